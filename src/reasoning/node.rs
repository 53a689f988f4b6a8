//! Reasoning Nodes
//!
//! Nodes live in an arena indexed by `NodeId` with explicit parent links.
//! An action may add several candidate children; the generator only ever
//! follows one, so a retained path is just the id chain from root to leaf.

use crate::reasoning::actions::ActionKind;
use crate::task::{render_schema, TableSchema, Task};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// Type of a node: the action that produced it, or `Root`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Root,
    Rephrase,
    SchemaSelection,
    IdentifyColumnValues,
    IdentifyColumnFunctions,
    SqlGeneration,
    SqlRevision,
    End,
}

impl From<ActionKind> for NodeType {
    fn from(kind: ActionKind) -> Self {
        match kind {
            ActionKind::Rephrase => NodeType::Rephrase,
            ActionKind::SchemaSelection => NodeType::SchemaSelection,
            ActionKind::IdentifyColumnValues => NodeType::IdentifyColumnValues,
            ActionKind::IdentifyColumnFunctions => NodeType::IdentifyColumnFunctions,
            ActionKind::SqlGeneration => NodeType::SqlGeneration,
            ActionKind::SqlRevision => NodeType::SqlRevision,
            ActionKind::End => NodeType::End,
        }
    }
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Root => "ROOT",
            NodeType::Rephrase => "REPHRASE",
            NodeType::SchemaSelection => "SCHEMA_SELECTION",
            NodeType::IdentifyColumnValues => "IDENTIFY_COLUMN_VALUES",
            NodeType::IdentifyColumnFunctions => "IDENTIFY_COLUMN_FUNCTIONS",
            NodeType::SqlGeneration => "SQL_GENERATION",
            NodeType::SqlRevision => "SQL_REVISION",
            NodeType::End => "END",
        }
    }

    /// SQLGeneration or SQLRevision
    pub fn emits_sql(&self) -> bool {
        matches!(self, NodeType::SqlGeneration | NodeType::SqlRevision)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only task data shared by every node of a generation run
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task: Task,
    pub db_path: PathBuf,

    /// Rendered DDL of the full schema
    pub schema_context: String,
}

impl TaskContext {
    pub fn new(task: Task, db_path: PathBuf) -> Self {
        let schema_context = render_schema(&task.table_schemas);
        Self {
            task,
            db_path,
            schema_context,
        }
    }
}

/// Fields accumulated along a path
///
/// A child starts from a copy of its parent's state; the producing action
/// overwrites what it derives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    #[serde(default)]
    pub rephrased_question: Option<String>,

    #[serde(default)]
    pub selected_schema: Option<Vec<TableSchema>>,

    /// Rendered DDL of `selected_schema`
    #[serde(default)]
    pub selected_schema_context: Option<String>,

    #[serde(default)]
    pub identified_column_values: Option<String>,

    #[serde(default)]
    pub identified_column_functions: Option<String>,

    /// SQL emitted by the most recent SQLGeneration step
    #[serde(default)]
    pub sql_query: Option<String>,

    /// SQL emitted by the most recent SQLRevision step
    #[serde(default)]
    pub revised_sql_query: Option<String>,

    /// Every SQL string emitted along the path, oldest first
    #[serde(default)]
    pub revision_history: Vec<String>,

    /// Last emitted SQL along the path
    #[serde(default)]
    pub final_sql_query: Option<String>,
}

impl NodeState {
    /// Record newly emitted SQL as the path's current answer
    pub fn emit_sql(&mut self, sql: String) {
        self.revision_history.push(sql.clone());
        self.final_sql_query = Some(sql);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub parent_action: Option<ActionKind>,
    pub state: NodeState,
}

impl ReasoningNode {
    pub fn is_terminal(&self) -> bool {
        self.node_type == NodeType::End
    }
}

/// Owner of every node created during one generation run
#[derive(Debug, Clone)]
pub struct NodeArena {
    context: Arc<TaskContext>,
    nodes: Vec<ReasoningNode>,
}

impl NodeArena {
    /// Create an arena holding only the root node
    pub fn new(context: Arc<TaskContext>) -> Self {
        let root = ReasoningNode {
            id: NodeId(0),
            node_type: NodeType::Root,
            depth: 0,
            parent: None,
            parent_action: None,
            state: NodeState::default(),
        };
        Self {
            context,
            nodes: vec![root],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn get(&self, id: NodeId) -> &ReasoningNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a child produced by `action`; depth is parent depth + 1
    pub fn push_child(&mut self, parent: NodeId, action: ActionKind, state: NodeState) -> NodeId {
        let id = NodeId(self.nodes.len());
        let depth = self.get(parent).depth + 1;
        self.nodes.push(ReasoningNode {
            id,
            node_type: action.into(),
            depth,
            parent: Some(parent),
            parent_action: Some(action),
            state,
        });
        id
    }

    /// Ids from root to `leaf`, following parent links
    pub fn path_to(&self, leaf: NodeId) -> Vec<NodeId> {
        let mut ids = vec![leaf];
        let mut cursor = self.get(leaf).parent;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.get(id).parent;
        }
        ids.reverse();
        ids
    }

    pub fn view(&self, leaf: NodeId) -> PathView<'_> {
        PathView {
            arena: self,
            ids: self.path_to(leaf),
        }
    }

    /// Owned, renumbered copy of the path ending at `leaf`
    pub fn snapshot(&self, leaf: NodeId) -> ReasoningPath {
        let nodes = self
            .path_to(leaf)
            .into_iter()
            .enumerate()
            .map(|(position, id)| {
                let mut node = self.get(id).clone();
                node.id = NodeId(position);
                node.parent = position.checked_sub(1).map(NodeId);
                node
            })
            .collect();
        ReasoningPath {
            question_id: self.context.task.question_id,
            db_id: self.context.task.db_id.clone(),
            nodes,
        }
    }
}

/// Borrowed root-to-leaf view into an arena
pub struct PathView<'a> {
    arena: &'a NodeArena,
    ids: Vec<NodeId>,
}

impl<'a> PathView<'a> {
    pub fn context(&self) -> &'a TaskContext {
        self.arena.context()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &'a ReasoningNode> + '_ {
        let arena = self.arena;
        self.ids.iter().map(move |id| arena.get(*id))
    }

    pub fn current(&self) -> &'a ReasoningNode {
        // A view always contains at least the root
        self.arena.get(self.ids[self.ids.len() - 1])
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether any step on this path was produced by `kind`
    pub fn has_occurred(&self, kind: ActionKind) -> bool {
        self.nodes().any(|node| node.parent_action == Some(kind))
    }

    pub fn final_sql_query(&self) -> Option<&'a str> {
        self.current().state.final_sql_query.as_deref()
    }
}

/// Ordered root-to-leaf sequence of nodes for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPath {
    pub question_id: u64,
    pub db_id: String,
    pub nodes: Vec<ReasoningNode>,
}

impl ReasoningPath {
    pub fn last(&self) -> Option<&ReasoningNode> {
        self.nodes.last()
    }

    pub fn is_terminal(&self) -> bool {
        self.last().map(|n| n.is_terminal()).unwrap_or(false)
    }

    pub fn final_sql_query(&self) -> Option<&str> {
        self.last().and_then(|n| n.state.final_sql_query.as_deref())
    }

    pub fn node_types(&self) -> Vec<NodeType> {
        self.nodes.iter().map(|n| n.node_type).collect()
    }

    /// `ROOT -> SCHEMA_SELECTION -> ...`
    pub fn signature(&self) -> String {
        self.nodes
            .iter()
            .map(|n| n.node_type.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            Task {
                question_id: 7,
                db_id: "financial".to_string(),
                question: "How many accounts?".to_string(),
                evidence: String::new(),
                table_schemas: vec![],
            },
            PathBuf::from("financial.sqlite"),
        ))
    }

    #[test]
    fn test_children_increment_depth_and_link_parent() {
        let mut arena = NodeArena::new(context());
        let a = arena.push_child(arena.root(), ActionKind::SchemaSelection, NodeState::default());
        let b = arena.push_child(a, ActionKind::SqlGeneration, NodeState::default());

        assert_eq!(arena.get(a).depth, 1);
        assert_eq!(arena.get(b).depth, 2);
        assert_eq!(arena.get(b).parent, Some(a));
        assert_eq!(arena.path_to(b), vec![NodeId(0), a, b]);
    }

    #[test]
    fn test_snapshot_skips_discarded_siblings_and_renumbers() {
        let mut arena = NodeArena::new(context());
        let root = arena.root();
        let _sibling = arena.push_child(root, ActionKind::Rephrase, NodeState::default());
        let kept = arena.push_child(root, ActionKind::Rephrase, NodeState::default());
        let leaf = arena.push_child(kept, ActionKind::SchemaSelection, NodeState::default());

        let path = arena.snapshot(leaf);
        assert_eq!(path.question_id, 7);
        assert_eq!(path.nodes.len(), 3);
        for (i, node) in path.nodes.iter().enumerate() {
            assert_eq!(node.depth, i);
            assert_eq!(node.id, NodeId(i));
        }
        assert_eq!(path.nodes[2].parent, Some(NodeId(1)));
        assert_eq!(path.signature(), "ROOT -> REPHRASE -> SCHEMA_SELECTION");
    }

    #[test]
    fn test_view_tracks_occurrences() {
        let mut arena = NodeArena::new(context());
        let a = arena.push_child(arena.root(), ActionKind::SchemaSelection, NodeState::default());
        let view = arena.view(a);
        assert!(view.has_occurred(ActionKind::SchemaSelection));
        assert!(!view.has_occurred(ActionKind::SqlGeneration));
        assert_eq!(view.current().node_type, NodeType::SchemaSelection);
    }

    #[test]
    fn test_emit_sql_tracks_history() {
        let mut state = NodeState::default();
        state.emit_sql("SELECT 1".to_string());
        state.emit_sql("SELECT 2".to_string());
        assert_eq!(state.final_sql_query.as_deref(), Some("SELECT 2"));
        assert_eq!(state.revision_history.len(), 2);
    }
}
