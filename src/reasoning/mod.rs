//! Reasoning
//!
//! Action catalogue, node arena and the single-path generator.

pub mod actions;
pub mod applier;
pub mod generator;
pub mod node;

pub use actions::{apply_action, legal_actions, ActionApplier, ActionKind, ActionSpec, CATALOGUE};
pub use applier::{ApplierSettings, LlmActionApplier};
pub use generator::{path_seeds, GeneratedPath, GenerationOutcome, PathGenerator};
pub use node::{NodeArena, NodeId, NodeState, NodeType, PathView, ReasoningNode, ReasoningPath, TaskContext};
