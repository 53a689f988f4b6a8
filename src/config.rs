//! Run Configuration
//!
//! Configuration surface for batch generation and self-consistency selection.
//! Generation configs are loaded from `.json` or `.yaml` files; model
//! credentials come from the environment (`.env` is honoured).

use crate::error::{GuidedSqlError, Result};
use crate::execution::ValidityPredicate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which action selection policy drives path generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Model-driven selection with heuristic fallback
    Llm,
    /// Fixed priority rules only
    Heuristic,
}

impl Default for SelectorKind {
    fn default() -> Self {
        SelectorKind::Llm
    }
}

/// Model invocation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name sent to the chat-completions endpoint
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Maximum output tokens per call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Number of reasoning paths generated per task
    #[serde(default = "default_num_paths")]
    pub n: usize,

    /// Completions requested per action application
    #[serde(default = "default_candidates_per_action")]
    pub candidates_per_action: usize,

    /// HTTP timeout for a single model call
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    512
}

fn default_num_paths() -> usize {
    1
}

fn default_candidates_per_action() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_sql_timeout_secs() -> u64 {
    60
}

fn default_n_processes() -> usize {
    4
}

/// Batch generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Root directory holding `<db_id>/<db_id>.sqlite`
    pub db_root_dir: PathBuf,

    /// JSON array of tasks
    pub tasks_file_path: PathBuf,

    /// Optional JSON array of `{"question_id": ..}` restricting the batch
    #[serde(default)]
    pub subset_file_path: Option<PathBuf>,

    /// Output directory for per-task artifacts
    pub save_root_dir: PathBuf,

    /// Step budget per path
    pub max_steps: usize,

    /// Depth budget per path
    pub max_depth: usize,

    pub model: ModelConfig,

    /// Number of tasks solved concurrently
    #[serde(default = "default_n_processes")]
    pub n_processes: usize,

    #[serde(default)]
    pub random_seed: u64,

    #[serde(default)]
    pub selector: SelectorKind,

    /// Timeout applied to every SQL execution during generation
    #[serde(default = "default_sql_timeout_secs")]
    pub sql_timeout_secs: u64,
}

impl RunConfig {
    /// Load a config from a `.json`, `.yaml` or `.yml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GuidedSqlError::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: RunConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            other => {
                return Err(GuidedSqlError::Config(format!(
                    "Unsupported config file extension: {}",
                    other.unwrap_or("<none>")
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject budgets and counts that would make generation meaningless
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 || self.max_depth == 0 {
            return Err(GuidedSqlError::Config(
                "max_steps and max_depth must be positive".to_string(),
            ));
        }
        if self.model.n == 0 {
            return Err(GuidedSqlError::Config("model.n must be at least 1".to_string()));
        }
        if self.n_processes == 0 {
            return Err(GuidedSqlError::Config("n_processes must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn sql_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_timeout_secs)
    }
}

/// Credentials for the chat-completions endpoint
#[derive(Debug, Clone)]
pub struct ModelCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl ModelCredentials {
    const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";

    /// Read `OPENAI_API_KEY` / `OPENAI_BASE_URL`, loading `.env` first
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            GuidedSqlError::Config("OPENAI_API_KEY is not set".to_string())
        })?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());

        Ok(Self { api_key, base_url })
    }
}

/// Self-consistency selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// How many times a representative query is re-run to estimate latency
    pub execution_time_repeat: usize,

    /// SQL emitted when no candidate survives
    pub error_marker: String,

    /// Database id emitted alongside the error marker
    pub default_db_id: String,

    /// Which successful results count towards the primary pool
    pub validity: ValidityPredicate,

    pub sql_timeout_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            execution_time_repeat: 20,
            error_marker: "ERROR".to_string(),
            default_db_id: "financial".to_string(),
            validity: ValidityPredicate::NonEmpty,
            sql_timeout_secs: default_sql_timeout_secs(),
        }
    }
}

impl SelectionConfig {
    pub fn sql_timeout(&self) -> Duration {
        Duration::from_secs(self.sql_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "db_root_dir": "data/dev_databases",
            "tasks_file_path": "data/tasks.json",
            "save_root_dir": "results/run1",
            "max_steps": 10,
            "max_depth": 12,
            "model": {"model": "gpt-4o-mini", "n": 5}
        }"#
    }

    #[test]
    fn test_load_json_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_json()).unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.model.n, 5);
        assert_eq!(config.model.temperature, 0.3);
        assert_eq!(config.model.max_tokens, 512);
        assert_eq!(config.selector, SelectorKind::Llm);
        assert_eq!(config.sql_timeout_secs, 60);
        assert!(config.subset_file_path.is_none());
    }

    #[test]
    fn test_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "db_root_dir: db\ntasks_file_path: tasks.json\nsave_root_dir: out\nmax_steps: 8\nmax_depth: 8\nselector: heuristic\nmodel:\n  model: m\n",
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.selector, SelectorKind::Heuristic);
        assert_eq!(config.model.n, 1);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "x = 1").unwrap();

        assert!(matches!(RunConfig::load(&path), Err(GuidedSqlError::Config(_))));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let mut config: RunConfig = serde_json::from_str(sample_json()).unwrap();
        config.max_steps = 0;
        assert!(config.validate().is_err());
    }
}
