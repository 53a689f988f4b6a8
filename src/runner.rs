//! Batch Runner
//!
//! Solves every pending task of a run. Tasks whose artifact already exists
//! are skipped, so re-invoking a run only does the remaining work.

use crate::config::{ModelCredentials, RunConfig, SelectorKind};
use crate::error::{GuidedSqlError, Result};
use crate::execution::{CachedOracle, SqlOracle, SqliteOracle};
use crate::llm::{LanguageModel, LlmClient};
use crate::policy::{ActionSelector, HeuristicSelector, LlmActionSelector};
use crate::reasoning::actions::ActionApplier;
use crate::reasoning::applier::{ApplierSettings, LlmActionApplier};
use crate::reasoning::generator::PathGenerator;
use crate::solver::{list_artifacts, TaskSolver};
use crate::task::{filter_by_subset, load_tasks, Task};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

/// `config.json` written at the start of every batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub config: RunConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub skipped: usize,
    pub solved: usize,
    pub failed: usize,
}

pub struct BatchRunner {
    config: RunConfig,
    solver: Arc<TaskSolver>,
}

impl BatchRunner {
    pub fn new(config: RunConfig, solver: TaskSolver) -> Self {
        Self {
            config,
            solver: Arc::new(solver),
        }
    }

    /// Wire the default stack: cached SQLite oracle, chat-completions model
    pub fn from_config(config: RunConfig) -> Result<Self> {
        let credentials = ModelCredentials::from_env()?;
        let model: Arc<dyn LanguageModel> = Arc::new(LlmClient::new(
            credentials.api_key,
            config.model.model.clone(),
            credentials.base_url,
            Duration::from_secs(config.model.request_timeout_secs),
        )?);
        let oracle: Arc<dyn SqlOracle> = Arc::new(CachedOracle::new(SqliteOracle::new()));

        let selector: Arc<dyn ActionSelector> = match config.selector {
            SelectorKind::Llm => Arc::new(LlmActionSelector::new(
                Arc::clone(&model),
                Arc::clone(&oracle),
                config.model.temperature,
                config.model.max_tokens,
                config.sql_timeout(),
            )),
            SelectorKind::Heuristic => Arc::new(HeuristicSelector),
        };
        let applier: Arc<dyn ActionApplier> = Arc::new(LlmActionApplier::new(
            model,
            oracle,
            ApplierSettings {
                temperature: config.model.temperature,
                max_tokens: config.model.max_tokens,
                candidates_per_action: config.model.candidates_per_action,
                sql_timeout: config.sql_timeout(),
            },
        ));

        info!(
            "🤖 Using {} ({:?} selector), {} paths per task",
            config.model.model, config.selector, config.model.n
        );

        let solver = TaskSolver::new(
            PathGenerator::new(config.max_steps, config.max_depth),
            selector,
            applier,
            config.model.n,
            config.db_root_dir.clone(),
            config.save_root_dir.clone(),
            config.random_seed,
        );
        Ok(Self::new(config, solver))
    }

    /// Tasks still to solve, plus how many were skipped as already done
    pub fn pending_tasks(&self) -> Result<(Vec<Task>, usize)> {
        let mut tasks = load_tasks(&self.config.tasks_file_path)?;
        if let Some(subset) = &self.config.subset_file_path {
            info!("Using subset file {} to filter tasks", subset.display());
            tasks = filter_by_subset(tasks, subset)?;
            info!("Filtered {} tasks", tasks.len());
        }

        let done: HashSet<u64> = list_artifacts(&self.config.save_root_dir)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let before = tasks.len();
        tasks.retain(|task| !done.contains(&task.question_id));
        let skipped = before - tasks.len();
        if skipped > 0 {
            info!("Ignoring {} already solved tasks", skipped);
        }
        Ok((tasks, skipped))
    }

    /// Write `config.json` with a fresh run id
    pub fn snapshot_config(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.save_root_dir)?;
        let snapshot = ConfigSnapshot {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config: self.config.clone(),
        };
        let path = self.config.save_root_dir.join("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        info!("Saving config to {} (run {})", path.display(), snapshot.run_id);
        Ok(path)
    }

    /// Solve all pending tasks with at most `n_processes` in flight
    ///
    /// A failing task is logged and abandoned; the batch carries on.
    pub async fn run_all(&self) -> Result<BatchReport> {
        let (tasks, skipped) = self.pending_tasks()?;
        self.snapshot_config()?;
        info!("There are {} tasks to solve", tasks.len());

        let outcomes: Vec<(u64, Result<()>)> = stream::iter(tasks)
            .map(|task| {
                let solver = Arc::clone(&self.solver);
                let question_id = task.question_id;
                async move {
                    let handle = tokio::spawn(async move { solver.solve(task).await.map(|_| ()) });
                    let outcome = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(GuidedSqlError::Task(format!("worker panicked: {}", e))),
                    };
                    (question_id, outcome)
                }
            })
            .buffer_unordered(self.config.n_processes.max(1))
            .collect()
            .await;

        let mut report = BatchReport {
            skipped,
            ..BatchReport::default()
        };
        for (question_id, outcome) in outcomes {
            match outcome {
                Ok(()) => report.solved += 1,
                Err(e) => {
                    error!("Error solving task {}: {:?}", question_id, e);
                    error!("The task {} has been given up", question_id);
                    report.failed += 1;
                }
            }
        }

        info!(
            "✅ Batch finished: {} solved, {} failed, {} skipped",
            report.solved, report.failed, report.skipped
        );
        Ok(report)
    }
}
