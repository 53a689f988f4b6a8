//! LLM-Guided Action Selection
//!
//! Summarises the path so far, presents the legal actions as a numbered
//! list and asks the model to pick one. Any failure (model error, missing
//! ```json block, index out of range) falls back to the heuristic rules.

use super::{heuristic_choice, ActionSelector};
use crate::execution::{execute_blocking, format_execution_result, SqlOracle};
use crate::llm::{LanguageModel, ModelSession};
use crate::reasoning::actions::ActionKind;
use crate::reasoning::applier::JSON_BLOCK;
use crate::reasoning::node::{NodeType, PathView};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SELECTION_PURPOSE: &str = "action_selection";
const TRUNCATE_CHARS: usize = 100;

pub struct LlmActionSelector<M, O> {
    model: M,
    oracle: Arc<O>,
    temperature: f64,
    max_tokens: u32,
    sql_timeout: Duration,
}

impl<M: LanguageModel, O: SqlOracle + 'static> LlmActionSelector<M, O> {
    pub fn new(model: M, oracle: O, temperature: f64, max_tokens: u32, sql_timeout: Duration) -> Self {
        Self {
            model,
            oracle: Arc::new(oracle),
            temperature,
            max_tokens,
            sql_timeout,
        }
    }

    /// Textual state summary shown to the model
    pub async fn build_context(&self, view: &PathView<'_>) -> String {
        let ctx = view.context();
        let mut parts = vec![format!("Question: {}", ctx.task.question)];
        if !ctx.task.evidence.is_empty() {
            parts.push(format!("Hint: {}", ctx.task.evidence));
        }

        let mut executed = Vec::new();
        for node in view.nodes().skip(1) {
            executed.push(node.node_type.as_str());
            let state = &node.state;
            match node.node_type {
                NodeType::Rephrase => {
                    if let Some(q) = &state.rephrased_question {
                        parts.push(format!("- Rephrased Question: {}", q));
                    }
                }
                NodeType::SchemaSelection => {
                    if let Some(tables) = &state.selected_schema {
                        parts.push(format!("- Selected Schema: {} tables", tables.len()));
                    }
                }
                NodeType::IdentifyColumnValues => {
                    if let Some(values) = &state.identified_column_values {
                        parts.push(format!("- Identified Column Values: {}...", truncate(values)));
                    }
                }
                NodeType::IdentifyColumnFunctions => {
                    if let Some(functions) = &state.identified_column_functions {
                        parts.push(format!("- Identified Functions: {}...", truncate(functions)));
                    }
                }
                NodeType::SqlGeneration => {
                    let sql = state.sql_query.as_deref().unwrap_or_default();
                    parts.push(format!("- Generated SQL: {}", sql));
                    self.push_compilation_status(&mut parts, view, sql).await;
                }
                NodeType::SqlRevision => {
                    let sql = state.revised_sql_query.as_deref().unwrap_or_default();
                    parts.push(format!("- Revised SQL: {}", sql));
                    self.push_compilation_status(&mut parts, view, sql).await;
                }
                NodeType::Root | NodeType::End => {}
            }
        }

        if !executed.is_empty() {
            parts.push(format!("\nExecuted Actions: {}", executed.join(", ")));
        }
        parts.push(format!("Current Depth: {}", view.current().depth));
        parts.join("\n")
    }

    async fn push_compilation_status(&self, parts: &mut Vec<String>, view: &PathView<'_>, sql: &str) {
        if sql.is_empty() {
            return;
        }
        let db_path = &view.context().db_path;
        let result = execute_blocking(Arc::clone(&self.oracle), db_path, sql, self.sql_timeout).await;
        if result.is_success() {
            parts.push("  ✓ SQL Compilation: PASSED".to_string());
            parts.push(format!(
                "  Execution Result Preview:\n{}",
                format_execution_result(&result, 2, 50)
            ));
        } else {
            parts.push("  ✗ SQL Compilation: FAILED".to_string());
            parts.push(format!("  Error: {}", result.error_message().unwrap_or_default()));
        }
    }

    pub async fn build_prompt(&self, view: &PathView<'_>, legal: &[ActionKind]) -> String {
        let ctx = view.context();
        let state = &view.current().state;
        let schema = state
            .selected_schema_context
            .as_deref()
            .unwrap_or(&ctx.schema_context);

        let options = legal
            .iter()
            .enumerate()
            .map(|(idx, kind)| format!("{}. {}", idx + 1, kind.description()))
            .collect::<Vec<_>>()
            .join("\n");
        let context = self.build_context(view).await;

        format!(
            r#"You are an expert SQL query generator. Given the current state of SQL query generation process, select the most appropriate next action.

Database Schema:
{schema}

Current State:
{context}

Available Actions:
{options}

Please analyze the current state and choose the best next action. Consider:
1. Have we done enough preparation to generate SQL? If not, choose actions that gather more information.
2. What information is still missing?
3. If SQL has been generated, check its compilation status to decide next steps.

Respond in the following JSON format:
```json
{{
    "reasoning": "Your reasoning for choosing this action",
    "selected_action_number": <number between 1 and {count}>
}}
```
"#,
            schema = schema,
            context = context,
            options = options,
            count = legal.len()
        )
    }
}

/// 1-based selection index and rationale from a model reply
pub fn parse_selection(response: &str) -> Option<(i64, String)> {
    let body = JSON_BLOCK.captures(response)?.get(1)?.as_str();
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let number = value.get("selected_action_number")?.as_i64()?;
    let reasoning = value
        .get("reasoning")
        .and_then(|r| r.as_str())
        .unwrap_or_default()
        .to_string();
    Some((number, reasoning))
}

fn truncate(text: &str) -> String {
    text.chars().take(TRUNCATE_CHARS).collect()
}

#[async_trait]
impl<M: LanguageModel, O: SqlOracle + 'static> ActionSelector for LlmActionSelector<M, O> {
    async fn select_action(
        &self,
        view: &PathView<'_>,
        legal: &[ActionKind],
        session: &mut ModelSession,
    ) -> ActionKind {
        let prompt = self.build_prompt(view, legal).await;
        let request = session.request(prompt, self.temperature, self.max_tokens, 1);

        let completion = match session.complete(&self.model, SELECTION_PURPOSE, &request).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!("⚠️  Action selection model call failed: {}, using heuristic", e);
                return heuristic_choice(view, legal);
            }
        };

        let response = completion.choices.first().map(String::as_str).unwrap_or_default();
        match parse_selection(response) {
            Some((number, reasoning)) if number >= 1 && (number as usize) <= legal.len() => {
                let action = legal[number as usize - 1];
                info!("🤖 Selected {} ({})", action, reasoning);
                action
            }
            Some((number, _)) => {
                warn!(
                    "⚠️  Selected action number {} outside 1..={}, using heuristic",
                    number,
                    legal.len()
                );
                heuristic_choice(view, legal)
            }
            None => {
                debug!("Unparseable selection response: {}", response);
                warn!("⚠️  Failed to parse action selection response, using heuristic");
                heuristic_choice(view, legal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_selection() {
        let reply = "Thinking...\n```json\n{\"reasoning\": \"need tables\", \"selected_action_number\": 2}\n```";
        assert_eq!(parse_selection(reply), Some((2, "need tables".to_string())));
    }

    #[test]
    fn test_parse_selection_rejects_malformed() {
        assert_eq!(parse_selection("choose 2"), None);
        assert_eq!(parse_selection("```json\n{\"selected_action_number\": \"two\"}\n```"), None);
        assert_eq!(parse_selection("```json\nnot json\n```"), None);
    }

    #[test]
    fn test_truncate_counts_chars() {
        let long = "é".repeat(150);
        assert_eq!(truncate(&long).chars().count(), 100);
    }
}
