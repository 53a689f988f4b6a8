//! LLM Client
//!
//! Model invocation capability used by action selection and action
//! application. `LanguageModel` is the seam; `LlmClient` talks to an
//! OpenAI-compatible chat-completions endpoint.

use crate::error::{GuidedSqlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// One model invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,

    /// Number of completions requested
    pub n: usize,

    /// Sampling seed forwarded to the endpoint, when supported
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub choices: Vec<String>,
    pub usage: TokenUsage,
}

/// Text-generation capability
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        (**self).complete(request).await
    }
}

/// Call and token counts for one purpose
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEntry {
    pub calls: u64,
    pub usage: TokenUsage,
}

/// Explicit model-cost accumulator
///
/// Each path generation owns one; the caller merges them into a task profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostAccumulator {
    entries: BTreeMap<String, CostEntry>,
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call under `purpose`
    pub fn record(&mut self, purpose: &str, usage: TokenUsage) {
        let entry = self.entries.entry(purpose.to_string()).or_default();
        entry.calls += 1;
        entry.usage.prompt_tokens += usage.prompt_tokens;
        entry.usage.completion_tokens += usage.completion_tokens;
    }

    pub fn merge(&mut self, other: &CostAccumulator) {
        for (purpose, theirs) in &other.entries {
            let entry = self.entries.entry(purpose.clone()).or_default();
            entry.calls += theirs.calls;
            entry.usage.prompt_tokens += theirs.usage.prompt_tokens;
            entry.usage.completion_tokens += theirs.usage.completion_tokens;
        }
    }

    pub fn entry(&self, purpose: &str) -> Option<&CostEntry> {
        self.entries.get(purpose)
    }

    pub fn total_calls(&self) -> u64 {
        self.entries.values().map(|e| e.calls).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.entries.values().map(|e| e.usage.total()).sum()
    }

    /// Log the per-purpose profile
    pub fn log_profile(&self, label: &str) {
        info!(
            "💰 Model cost for {}: {} calls, {} tokens",
            label,
            self.total_calls(),
            self.total_tokens()
        );
        for (purpose, entry) in &self.entries {
            info!(
                "   {}: {} calls, {} prompt / {} completion tokens",
                purpose, entry.calls, entry.usage.prompt_tokens, entry.usage.completion_tokens
            );
        }
    }
}

/// Per-path model invocation state
///
/// Carries the path's sampling seed and its cost accumulator into every
/// selection and action call made while generating that path.
#[derive(Debug, Clone, Default)]
pub struct ModelSession {
    pub seed: Option<u64>,
    pub cost: CostAccumulator,
}

impl ModelSession {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            cost: CostAccumulator::new(),
        }
    }

    pub fn request(&self, prompt: String, temperature: f64, max_tokens: u32, n: usize) -> CompletionRequest {
        CompletionRequest {
            prompt,
            temperature,
            max_tokens,
            n,
            seed: self.seed,
        }
    }

    /// Invoke the model and charge the call to `purpose`
    pub async fn complete<M: LanguageModel + ?Sized>(
        &mut self,
        model: &M,
        purpose: &str,
        request: &CompletionRequest,
    ) -> Result<Completion> {
        let completion = model.complete(request).await?;
        self.cost.record(purpose, completion.usage);
        Ok(completion)
    }
}

/// OpenAI-compatible chat-completions client
#[derive(Clone)]
pub struct LlmClient {
    api_key: String,
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuidedSqlError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key,
            base_url,
            model,
            http,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": request.prompt}
            ],
            "temperature": request.temperature,
            "n": request.n.max(1),
        });

        // Newer models only accept max_completion_tokens
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("gpt-4") {
            body["max_completion_tokens"] = serde_json::json!(request.max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }

        if let Some(seed) = request.seed {
            body["seed"] = serde_json::json!(seed);
        }
        body
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = self.request_body(request);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| GuidedSqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GuidedSqlError::Llm(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GuidedSqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        parse_chat_response(&response_json)
    }
}

/// Extract choices and usage from a chat-completions response body
pub fn parse_chat_response(response_json: &serde_json::Value) -> Result<Completion> {
    if let Some(error) = response_json.get("error") {
        return Err(GuidedSqlError::Llm(format!("LLM API error: {}", error)));
    }

    let choices = response_json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| GuidedSqlError::Llm("No choices array in LLM response".to_string()))?;

    if choices.is_empty() {
        return Err(GuidedSqlError::Llm("Empty choices array in LLM response".to_string()));
    }

    let mut texts = Vec::with_capacity(choices.len());
    for choice in choices {
        match choice.get("finish_reason").and_then(|r| r.as_str()) {
            Some("length") => warn!("⚠️  LLM response was truncated due to length limit"),
            Some("content_filter") => {
                return Err(GuidedSqlError::Llm(
                    "LLM response was filtered by content policy".to_string(),
                ))
            }
            _ => {}
        }
        if let Some(content) = choice["message"]["content"].as_str() {
            texts.push(content.to_string());
        }
    }

    if texts.is_empty() {
        return Err(GuidedSqlError::Llm("No content in LLM response".to_string()));
    }

    let usage = TokenUsage {
        prompt_tokens: response_json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
        completion_tokens: response_json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
    };

    Ok(Completion {
        choices: texts,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let body = serde_json::json!({
            "choices": [
                {"message": {"content": "SELECT 1"}, "finish_reason": "stop"},
                {"message": {"content": "SELECT 2"}, "finish_reason": "length"}
            ],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4}
        });

        let completion = parse_chat_response(&body).unwrap();
        assert_eq!(completion.choices, vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(completion.usage.total(), 16);
    }

    #[test]
    fn test_parse_chat_response_errors() {
        let error = serde_json::json!({"error": {"message": "bad key"}});
        assert!(parse_chat_response(&error).is_err());

        let filtered = serde_json::json!({
            "choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]
        });
        assert!(parse_chat_response(&filtered).is_err());

        let empty = serde_json::json!({"choices": []});
        assert!(parse_chat_response(&empty).is_err());
    }

    #[test]
    fn test_request_body_uses_completion_tokens_for_new_models() {
        let client = LlmClient::new(
            "key".into(),
            "gpt-4o-mini".into(),
            "http://localhost".into(),
            Duration::from_secs(5),
        )
        .unwrap();
        let body = client.request_body(&CompletionRequest {
            prompt: "hi".into(),
            temperature: 0.3,
            max_tokens: 512,
            n: 1,
            seed: Some(7),
        });
        assert_eq!(body["max_completion_tokens"], 512);
        assert_eq!(body["seed"], 7);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_cost_accumulator_merge() {
        let mut a = CostAccumulator::new();
        a.record("action_selection", TokenUsage { prompt_tokens: 10, completion_tokens: 2 });
        let mut b = CostAccumulator::new();
        b.record("action_selection", TokenUsage { prompt_tokens: 5, completion_tokens: 1 });
        b.record("sql_generation", TokenUsage { prompt_tokens: 100, completion_tokens: 40 });

        a.merge(&b);
        assert_eq!(a.total_calls(), 3);
        assert_eq!(a.entry("action_selection").unwrap().usage.prompt_tokens, 15);
        assert_eq!(a.total_tokens(), 158);
    }
}
