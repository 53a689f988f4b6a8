//! Action Catalogue
//!
//! Closed set of transformation steps and the table that decides which of
//! them are legal from a given path. Legality depends only on the current
//! node type and on which kinds already occurred on the path.
//!
//! | Action                    | Follows node types                     | Once | Requires        |
//! |---------------------------|----------------------------------------|------|-----------------|
//! | Rephrase                  | Root                                   | yes  | -               |
//! | SchemaSelection           | Root, Rephrase, IdentifyColumn*        | yes  | -               |
//! | IdentifyColumnValues      | Root, Rephrase, SchemaSelection, Funcs | yes  | -               |
//! | IdentifyColumnFunctions   | Root, Rephrase, SchemaSelection, Vals  | yes  | -               |
//! | SQLGeneration             | Rephrase, SchemaSelection, Identify*   | yes  | SchemaSelection |
//! | SQLRevision               | SQLGeneration, SQLRevision             | no   | SQLGeneration   |
//! | End                       | SQLGeneration, SQLRevision             | no   | SQLGeneration   |

use crate::error::Result;
use crate::llm::ModelSession;
use crate::reasoning::node::{NodeArena, NodeId, NodeState, NodeType, PathView};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Rephrase,
    SchemaSelection,
    IdentifyColumnValues,
    IdentifyColumnFunctions,
    SqlGeneration,
    SqlRevision,
    End,
}

/// Static behaviour row for one action kind
#[derive(Debug)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub description: &'static str,

    /// Legal at most once per path
    pub once: bool,

    /// Kinds that must already have occurred on the path
    pub requires: &'static [ActionKind],

    /// Node types this action may be applied to
    pub follows: &'static [NodeType],
}

/// Catalogue in canonical order
pub static CATALOGUE: [ActionSpec; 7] = [
    ActionSpec {
        kind: ActionKind::Rephrase,
        description: "Rephrase Question: Reformulate the question to make it clearer and more specific",
        once: true,
        requires: &[],
        follows: &[NodeType::Root],
    },
    ActionSpec {
        kind: ActionKind::SchemaSelection,
        description: "Schema Selection: Select relevant tables and columns from the database schema",
        once: true,
        requires: &[],
        follows: &[
            NodeType::Root,
            NodeType::Rephrase,
            NodeType::IdentifyColumnValues,
            NodeType::IdentifyColumnFunctions,
        ],
    },
    ActionSpec {
        kind: ActionKind::IdentifyColumnValues,
        description: "Identify Column Values: Identify specific column values mentioned in the question",
        once: true,
        requires: &[],
        follows: &[
            NodeType::Root,
            NodeType::Rephrase,
            NodeType::SchemaSelection,
            NodeType::IdentifyColumnFunctions,
        ],
    },
    ActionSpec {
        kind: ActionKind::IdentifyColumnFunctions,
        description: "Identify Column Functions: Identify SQL functions (COUNT, SUM, AVG, etc.) needed for the query",
        once: true,
        requires: &[],
        follows: &[
            NodeType::Root,
            NodeType::Rephrase,
            NodeType::SchemaSelection,
            NodeType::IdentifyColumnValues,
        ],
    },
    ActionSpec {
        kind: ActionKind::SqlGeneration,
        description: "SQL Generation: Generate the final SQL query based on previous analysis",
        once: true,
        requires: &[ActionKind::SchemaSelection],
        follows: &[
            NodeType::Rephrase,
            NodeType::SchemaSelection,
            NodeType::IdentifyColumnValues,
            NodeType::IdentifyColumnFunctions,
        ],
    },
    ActionSpec {
        kind: ActionKind::SqlRevision,
        description: "SQL Revision: Revise the previously generated SQL query based on execution results",
        once: false,
        requires: &[ActionKind::SqlGeneration],
        follows: &[NodeType::SqlGeneration, NodeType::SqlRevision],
    },
    ActionSpec {
        kind: ActionKind::End,
        description: "End: Finish the current reasoning path",
        once: false,
        requires: &[ActionKind::SqlGeneration],
        follows: &[NodeType::SqlGeneration, NodeType::SqlRevision],
    },
];

impl ActionKind {
    pub fn spec(&self) -> &'static ActionSpec {
        &CATALOGUE[self.position()]
    }

    /// Index in catalogue order
    pub fn position(&self) -> usize {
        match self {
            ActionKind::Rephrase => 0,
            ActionKind::SchemaSelection => 1,
            ActionKind::IdentifyColumnValues => 2,
            ActionKind::IdentifyColumnFunctions => 3,
            ActionKind::SqlGeneration => 4,
            ActionKind::SqlRevision => 5,
            ActionKind::End => 6,
        }
    }

    pub fn description(&self) -> &'static str {
        self.spec().description
    }

    /// Key used for cost accounting and logs
    pub fn purpose(&self) -> &'static str {
        match self {
            ActionKind::Rephrase => "rephrase",
            ActionKind::SchemaSelection => "schema_selection",
            ActionKind::IdentifyColumnValues => "identify_column_values",
            ActionKind::IdentifyColumnFunctions => "identify_column_functions",
            ActionKind::SqlGeneration => "sql_generation",
            ActionKind::SqlRevision => "sql_revision",
            ActionKind::End => "end",
        }
    }

    pub fn all() -> impl Iterator<Item = ActionKind> {
        CATALOGUE.iter().map(|spec| spec.kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", NodeType::from(*self))
    }
}

impl ActionSpec {
    fn is_legal(&self, view: &PathView<'_>) -> bool {
        let current = view.current().node_type;
        self.follows.contains(&current)
            && !(self.once && view.has_occurred(self.kind))
            && self.requires.iter().all(|kind| view.has_occurred(*kind))
    }
}

/// Legal next actions for the path, in catalogue order
pub fn legal_actions(view: &PathView<'_>) -> Vec<ActionKind> {
    CATALOGUE
        .iter()
        .filter(|spec| spec.is_legal(view))
        .map(|spec| spec.kind)
        .collect()
}

/// Produces candidate child states for an action
///
/// Implementations may call a language model or the SQL oracle. An empty
/// vector means the action produced no viable continuation.
#[async_trait]
pub trait ActionApplier: Send + Sync {
    async fn candidates(
        &self,
        action: ActionKind,
        view: &PathView<'_>,
        session: &mut ModelSession,
    ) -> Result<Vec<NodeState>>;
}

/// Apply `action` to `parent`, adding one child per candidate state
pub async fn apply_action<A: ActionApplier + ?Sized>(
    applier: &A,
    action: ActionKind,
    arena: &mut NodeArena,
    parent: NodeId,
    session: &mut ModelSession,
) -> Result<Vec<NodeId>> {
    let states = {
        let view = arena.view(parent);
        applier.candidates(action, &view, session).await?
    };

    Ok(states
        .into_iter()
        .map(|state| arena.push_child(parent, action, state))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::node::TaskContext;
    use crate::task::Task;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn arena() -> NodeArena {
        NodeArena::new(Arc::new(TaskContext::new(
            Task {
                question_id: 1,
                db_id: "db".to_string(),
                question: "q".to_string(),
                evidence: String::new(),
                table_schemas: vec![],
            },
            PathBuf::from("db.sqlite"),
        )))
    }

    /// Walk every legal path up to `max_depth` and hand each leaf to `check`
    fn explore(arena: &mut NodeArena, leaf: NodeId, max_depth: usize, check: &mut dyn FnMut(&NodeArena, NodeId)) {
        check(arena, leaf);
        if arena.get(leaf).depth >= max_depth {
            return;
        }
        for kind in legal_actions(&arena.view(leaf)) {
            let child = arena.push_child(leaf, kind, NodeState::default());
            explore(arena, child, max_depth, check);
        }
    }

    #[test]
    fn test_root_actions() {
        let arena = arena();
        let legal = legal_actions(&arena.view(arena.root()));
        assert_eq!(
            legal,
            vec![
                ActionKind::Rephrase,
                ActionKind::SchemaSelection,
                ActionKind::IdentifyColumnValues,
                ActionKind::IdentifyColumnFunctions,
            ]
        );
    }

    #[test]
    fn test_catalogue_positions_match_order() {
        for (idx, spec) in CATALOGUE.iter().enumerate() {
            assert_eq!(spec.kind.position(), idx);
        }
    }

    #[test]
    fn test_invariants_hold_on_every_reachable_path() {
        let mut arena = arena();
        let root = arena.root();
        let mut visited = 0;

        explore(&mut arena, root, 8, &mut |arena, leaf| {
            visited += 1;
            let view = arena.view(leaf);
            let legal = legal_actions(&view);
            let current = view.current().node_type;

            if view.has_occurred(ActionKind::SchemaSelection) {
                assert!(!legal.contains(&ActionKind::SchemaSelection));
            }
            if legal.contains(&ActionKind::SqlGeneration) {
                assert!(view.has_occurred(ActionKind::SchemaSelection));
            }
            if legal.contains(&ActionKind::End) {
                assert!(view.has_occurred(ActionKind::SqlGeneration));
            }
            if current.emits_sql() {
                assert!(legal.contains(&ActionKind::SqlRevision));
                assert!(legal.contains(&ActionKind::End));
            }
            if current == NodeType::End {
                assert!(legal.is_empty());
            } else {
                assert!(!legal.is_empty(), "dead end at {:?}", current);
            }

            let schema_count = view
                .nodes()
                .filter(|n| n.node_type == NodeType::SchemaSelection)
                .count();
            assert!(schema_count <= 1);
        });

        assert!(visited > 100);
    }

    #[test]
    fn test_legality_is_deterministic() {
        let mut arena = arena();
        let a = arena.push_child(arena.root(), ActionKind::Rephrase, NodeState::default());
        let first = legal_actions(&arena.view(a));
        let second = legal_actions(&arena.view(a));
        assert_eq!(first, second);
        assert!(!first.contains(&ActionKind::Rephrase));
        assert!(!first.contains(&ActionKind::SqlGeneration));
    }
}
