//! Task Solver
//!
//! Generates the configured number of reasoning paths for one task, keeps
//! the terminal ones and persists them as `<question_id>.json`.

use crate::error::{GuidedSqlError, Result};
use crate::llm::CostAccumulator;
use crate::policy::ActionSelector;
use crate::reasoning::actions::ActionApplier;
use crate::reasoning::generator::{path_seeds, PathGenerator};
use crate::reasoning::node::{ReasoningPath, TaskContext};
use crate::task::{db_path, Task};
use futures::future::join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of solving one task
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub question_id: u64,
    pub attempted: usize,
    pub terminal: usize,
    pub artifact: PathBuf,
    pub cost: CostAccumulator,
}

pub struct TaskSolver {
    generator: PathGenerator,
    selector: Arc<dyn ActionSelector>,
    applier: Arc<dyn ActionApplier>,
    num_paths: usize,
    db_root_dir: PathBuf,
    save_root_dir: PathBuf,
    random_seed: u64,
}

impl TaskSolver {
    pub fn new(
        generator: PathGenerator,
        selector: Arc<dyn ActionSelector>,
        applier: Arc<dyn ActionApplier>,
        num_paths: usize,
        db_root_dir: impl Into<PathBuf>,
        save_root_dir: impl Into<PathBuf>,
        random_seed: u64,
    ) -> Self {
        Self {
            generator,
            selector,
            applier,
            num_paths,
            db_root_dir: db_root_dir.into(),
            save_root_dir: save_root_dir.into(),
            random_seed,
        }
    }

    pub fn save_root_dir(&self) -> &Path {
        &self.save_root_dir
    }

    /// Generate, filter and persist the paths for `task`
    pub async fn solve(&self, task: Task) -> Result<SolveReport> {
        let question_id = task.question_id;
        let path = db_path(&self.db_root_dir, &task.db_id);
        let context = Arc::new(TaskContext::new(task, path));
        let seeds = path_seeds(self.random_seed.wrapping_add(question_id), self.num_paths);

        let attempts = join_all(seeds.into_iter().map(|seed| {
            self.generator.generate_one_path(
                Arc::clone(&context),
                self.selector.as_ref(),
                self.applier.as_ref(),
                Some(seed),
            )
        }))
        .await;

        let mut cost = CostAccumulator::new();
        let mut kept: Vec<ReasoningPath> = Vec::new();
        for (idx, attempt) in attempts.into_iter().enumerate() {
            match attempt {
                Ok(generated) => {
                    cost.merge(&generated.cost);
                    if generated.is_terminal() {
                        info!("✓ Path {} completed", idx + 1);
                        info!("  Final SQL: {}", generated.path.final_sql_query().unwrap_or_default());
                        kept.push(generated.path);
                    } else {
                        warn!(
                            "✗ Path {} did not reach terminal node ({:?})",
                            idx + 1,
                            generated.outcome
                        );
                    }
                }
                Err(e) => warn!("✗ Error generating path {}: {}", idx + 1, e),
            }
        }

        let artifact = save_paths(&self.save_root_dir, question_id, &kept)?;
        info!(
            "✅ Question {} completed: {} of {} paths terminal, saved to {}",
            question_id,
            kept.len(),
            self.num_paths,
            artifact.display()
        );
        cost.log_profile(&format!("question {}", question_id));

        Ok(SolveReport {
            question_id,
            attempted: self.num_paths,
            terminal: kept.len(),
            artifact,
            cost,
        })
    }
}

/// `<dir>/<question_id>.json`
pub fn artifact_path(dir: impl AsRef<Path>, question_id: u64) -> PathBuf {
    dir.as_ref().join(format!("{}.json", question_id))
}

/// Question id encoded in an artifact file name
///
/// Returns `None` for non-artifacts such as `config.json`.
pub fn artifact_id(file: &Path) -> Option<u64> {
    if file.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    file.file_stem()?.to_str()?.parse().ok()
}

/// All artifacts in `dir`, ordered by question id
pub fn list_artifacts(dir: impl AsRef<Path>) -> Result<Vec<(u64, PathBuf)>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if let Some(id) = artifact_id(&path) {
            artifacts.push((id, path));
        }
    }
    artifacts.sort_by_key(|(id, _)| *id);
    Ok(artifacts)
}

pub fn save_paths(dir: impl AsRef<Path>, question_id: u64, paths: &[ReasoningPath]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let file = artifact_path(dir, question_id);
    let json = serde_json::to_string_pretty(paths)?;
    std::fs::write(&file, json).map_err(|e| {
        GuidedSqlError::Persistence(format!("Failed to write {}: {}", file.display(), e))
    })?;
    Ok(file)
}

pub fn load_paths(file: impl AsRef<Path>) -> Result<Vec<ReasoningPath>> {
    let file = file.as_ref();
    let content = std::fs::read_to_string(file).map_err(|e| {
        GuidedSqlError::Persistence(format!("Failed to read {}: {}", file.display(), e))
    })?;
    let paths: Vec<ReasoningPath> = serde_json::from_str(&content)?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_id() {
        assert_eq!(artifact_id(Path::new("/tmp/run/42.json")), Some(42));
        assert_eq!(artifact_id(Path::new("/tmp/run/config.json")), None);
        assert_eq!(artifact_id(Path::new("/tmp/run/42.pkl")), None);
    }

    #[test]
    fn test_list_artifacts_sorted_and_skips_config() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["10.json", "2.json", "config.json", "notes.txt"] {
            std::fs::write(dir.path().join(name), "[]").unwrap();
        }
        let ids: Vec<u64> = list_artifacts(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![2, 10]);
    }

    #[test]
    fn test_missing_dir_has_no_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_artifacts(dir.path().join("absent")).unwrap().is_empty());
    }
}
