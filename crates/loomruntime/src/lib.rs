//! Workflow execution runtime
//!
//! This crate provides the engine that orders and runs workflow graphs,
//! the node registry that dispatches by node type, and the file-backed step
//! journal that makes runs resumable across restarts.

mod config;
mod executor;
mod journal;
mod registry;
mod runtime;
mod sort;

pub use config::{ConfigError, HttpSettings, JournalConfig, RuntimeConfig};
pub use executor::{ExecutionResult, RunFailure, WorkflowExecutor};
pub use journal::FileJournal;
pub use registry::NodeRegistry;
pub use runtime::{GraphSource, LoomRuntime, TriggerEvent, WorkflowStore};
pub use sort::topological_order;
