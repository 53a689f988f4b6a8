//! Action Selection Policy
//!
//! Picks one action from the legal set at a path's current node. Both
//! strategies are total: they always return a member of `legal`.

pub mod heuristic;
pub mod llm_guided;

pub use heuristic::{heuristic_choice, HeuristicSelector};
pub use llm_guided::LlmActionSelector;

use crate::llm::ModelSession;
use crate::reasoning::actions::ActionKind;
use crate::reasoning::node::PathView;
use async_trait::async_trait;

#[async_trait]
pub trait ActionSelector: Send + Sync {
    /// Choose the next action; `legal` is never empty
    async fn select_action(
        &self,
        view: &PathView<'_>,
        legal: &[ActionKind],
        session: &mut ModelSession,
    ) -> ActionKind;
}
