//! Path Generator
//!
//! Drives one linear reasoning path: legal actions, select one, apply it,
//! follow the first child. Stops on End, on the step/depth budget, or when
//! no continuation exists. A path left on an SQL-emitting node gets one
//! synthesized End so its SQL is still usable.

use crate::error::Result;
use crate::llm::{CostAccumulator, ModelSession};
use crate::policy::ActionSelector;
use crate::reasoning::actions::{apply_action, legal_actions, ActionApplier, ActionKind};
use crate::reasoning::node::{NodeArena, ReasoningPath, TaskContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// Last node is End
    Terminal,
    /// Step or depth budget reached first
    Exhausted,
    /// No legal action, or the chosen action produced no children
    Stuck,
}

#[derive(Debug, Clone)]
pub struct GeneratedPath {
    pub path: ReasoningPath,
    pub outcome: GenerationOutcome,

    /// End was synthesized after the loop stopped
    pub forced_closure: bool,
    pub cost: CostAccumulator,
}

impl GeneratedPath {
    pub fn is_terminal(&self) -> bool {
        self.outcome == GenerationOutcome::Terminal
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PathGenerator {
    pub max_steps: usize,
    pub max_depth: usize,
}

impl PathGenerator {
    pub fn new(max_steps: usize, max_depth: usize) -> Self {
        Self { max_steps, max_depth }
    }

    /// Generate one path from a fresh root
    ///
    /// Calls share nothing mutable; each owns its arena and model session.
    /// An `Err` from the applier aborts this path only.
    pub async fn generate_one_path<S, A>(
        &self,
        context: Arc<TaskContext>,
        selector: &S,
        applier: &A,
        seed: Option<u64>,
    ) -> Result<GeneratedPath>
    where
        S: ActionSelector + ?Sized,
        A: ActionApplier + ?Sized,
    {
        let mut arena = NodeArena::new(context);
        let mut session = ModelSession::new(seed);
        let mut current = arena.root();
        let mut steps = 0usize;

        let mut outcome = loop {
            let node = arena.get(current);
            if node.is_terminal() {
                break GenerationOutcome::Terminal;
            }
            if steps >= self.max_steps || node.depth >= self.max_depth {
                break GenerationOutcome::Exhausted;
            }

            let view = arena.view(current);
            let legal = legal_actions(&view);
            if legal.is_empty() {
                break GenerationOutcome::Stuck;
            }
            let action = selector.select_action(&view, &legal, &mut session).await;
            drop(view);
            debug!("step {}: {}", steps + 1, action);

            let children = apply_action(applier, action, &mut arena, current, &mut session).await?;
            match children.first() {
                Some(&child) => {
                    current = child;
                    steps += 1;
                }
                None => {
                    debug!("{} produced no viable continuation", action);
                    break GenerationOutcome::Stuck;
                }
            }
        };

        let mut forced_closure = false;
        if outcome != GenerationOutcome::Terminal && arena.get(current).node_type.emits_sql() {
            match apply_action(applier, ActionKind::End, &mut arena, current, &mut session).await {
                Ok(children) => {
                    if let Some(&end) = children.first() {
                        current = end;
                        outcome = GenerationOutcome::Terminal;
                        forced_closure = true;
                    }
                }
                Err(e) => warn!("⚠️  Forced End failed: {}", e),
            }
        }

        Ok(GeneratedPath {
            path: arena.snapshot(current),
            outcome,
            forced_closure,
            cost: session.cost,
        })
    }
}

/// Per-path sampling seeds derived from the run seed
pub fn path_seeds(random_seed: u64, count: usize) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(random_seed);
    (0..count).map(|_| rng.gen()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::HeuristicSelector;
    use crate::reasoning::node::{NodeState, NodeType, PathView};
    use crate::task::Task;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct ScriptedApplier;

    #[async_trait]
    impl ActionApplier for ScriptedApplier {
        async fn candidates(
            &self,
            action: ActionKind,
            view: &PathView<'_>,
            _session: &mut ModelSession,
        ) -> Result<Vec<NodeState>> {
            let mut state = view.current().state.clone();
            if action == ActionKind::SqlGeneration {
                state.sql_query = Some("SELECT 1".to_string());
                state.emit_sql("SELECT 1".to_string());
            }
            Ok(vec![state])
        }
    }

    fn context() -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            Task {
                question_id: 11,
                db_id: "db".to_string(),
                question: "q".to_string(),
                evidence: String::new(),
                table_schemas: vec![],
            },
            PathBuf::from("db.sqlite"),
        ))
    }

    #[tokio::test]
    async fn test_heuristic_path_terminates() {
        let generated = PathGenerator::new(10, 10)
            .generate_one_path(context(), &HeuristicSelector, &ScriptedApplier, None)
            .await
            .unwrap();

        assert_eq!(generated.outcome, GenerationOutcome::Terminal);
        assert!(!generated.forced_closure);
        assert_eq!(
            generated.path.node_types(),
            vec![NodeType::Root, NodeType::SchemaSelection, NodeType::SqlGeneration, NodeType::End]
        );
        assert_eq!(generated.path.final_sql_query(), Some("SELECT 1"));
    }

    #[tokio::test]
    async fn test_zero_budget_is_exhausted_at_root() {
        let generated = PathGenerator::new(0, 10)
            .generate_one_path(context(), &HeuristicSelector, &ScriptedApplier, None)
            .await
            .unwrap();
        assert_eq!(generated.outcome, GenerationOutcome::Exhausted);
        assert_eq!(generated.path.nodes.len(), 1);
    }

    #[test]
    fn test_path_seeds_are_reproducible() {
        assert_eq!(path_seeds(42, 4), path_seeds(42, 4));
        assert_ne!(path_seeds(42, 4), path_seeds(43, 4));
        assert_eq!(path_seeds(1, 3).len(), 3);
    }
}
