//! Core abstractions for the loom workflow engine
//!
//! This crate provides the graph model, execution context, template
//! renderer, error taxonomy, node trait and durable step contract that all
//! other components depend on.

mod context;
mod error;
pub mod events;
mod node;
mod step;
mod template;
mod workflow;

pub use context::{ContextPatch, ExecutionContext};
pub use error::{ClassifiedError, ErrorCategory, ErrorKind, FlowError, JournalError, NodeError, WorkflowError};
pub use events::*;
pub use node::{parse_config, require_str, ConfigField, Node, NodeContext, NodeMetadata, NodeOutput};
pub use step::{MemoryJournal, StepJournal, StepRecord, StepRunner};
pub use template::TemplateRenderer;
pub use workflow::{Connection, NodeId, NodeKind, NodeSpec, Position, RetryPolicy, WorkflowGraph, WorkflowId};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
