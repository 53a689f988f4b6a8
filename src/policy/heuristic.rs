//! Heuristic priority rules, also the model-driven strategy's fallback.

use super::ActionSelector;
use crate::llm::ModelSession;
use crate::reasoning::actions::ActionKind;
use crate::reasoning::node::PathView;
use async_trait::async_trait;

/// Fixed-order priority rules
///
/// 1. End, once SQLGeneration has occurred
/// 2. SQLGeneration, once SchemaSelection has occurred
/// 3. SchemaSelection, if not yet done
/// 4. First legal action in catalogue order
pub fn heuristic_choice(view: &PathView<'_>, legal: &[ActionKind]) -> ActionKind {
    let has_sql = view.has_occurred(ActionKind::SqlGeneration);
    let has_schema = view.has_occurred(ActionKind::SchemaSelection);

    if has_sql && legal.contains(&ActionKind::End) {
        return ActionKind::End;
    }
    if has_schema && legal.contains(&ActionKind::SqlGeneration) {
        return ActionKind::SqlGeneration;
    }
    if !has_schema && legal.contains(&ActionKind::SchemaSelection) {
        return ActionKind::SchemaSelection;
    }
    // Callers guarantee a non-empty legal set
    legal.first().copied().unwrap_or(ActionKind::End)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSelector;

#[async_trait]
impl ActionSelector for HeuristicSelector {
    async fn select_action(
        &self,
        view: &PathView<'_>,
        legal: &[ActionKind],
        _session: &mut ModelSession,
    ) -> ActionKind {
        heuristic_choice(view, legal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::actions::legal_actions;
    use crate::reasoning::node::{NodeArena, NodeState, TaskContext};
    use crate::task::Task;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn arena() -> NodeArena {
        NodeArena::new(Arc::new(TaskContext::new(
            Task {
                question_id: 3,
                db_id: "db".to_string(),
                question: "q".to_string(),
                evidence: String::new(),
                table_schemas: vec![],
            },
            PathBuf::from("db.sqlite"),
        )))
    }

    #[test]
    fn test_heuristic_walks_schema_sql_end() {
        let mut arena = arena();
        let mut leaf = arena.root();
        let mut chosen = Vec::new();

        for _ in 0..3 {
            let view = arena.view(leaf);
            let legal = legal_actions(&view);
            let action = heuristic_choice(&view, &legal);
            chosen.push(action);
            leaf = arena.push_child(leaf, action, NodeState::default());
        }

        assert_eq!(
            chosen,
            vec![ActionKind::SchemaSelection, ActionKind::SqlGeneration, ActionKind::End]
        );
    }

    #[test]
    fn test_heuristic_falls_back_to_first_legal() {
        let arena = arena();
        let view = arena.view(arena.root());
        let legal = [ActionKind::Rephrase, ActionKind::IdentifyColumnValues];
        assert_eq!(heuristic_choice(&view, &legal), ActionKind::Rephrase);
    }
}
