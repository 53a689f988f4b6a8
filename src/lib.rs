pub mod compare;
pub mod config;
pub mod error;
pub mod execution;
pub mod llm;
pub mod policy;
pub mod reasoning;
pub mod runner;
pub mod selection;
pub mod solver;
pub mod summary;
pub mod task;

pub use error::{GuidedSqlError, Result};
