use crate::{ContextPatch, EventEmitter, ExecutionContext, NodeError, NodeId, NodeKind, StepRunner, TemplateRenderer};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// Core trait that every node executor implements
#[async_trait]
pub trait Node: Send + Sync {
    /// Node type this executor handles
    fn node_type(&self) -> NodeKind;

    /// Description shown by tooling
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }

    /// Check static configuration. Called before any durable step runs, so a
    /// failure here is always terminal.
    fn validate(&self, _data: &Value) -> Result<(), NodeError> {
        Ok(())
    }

    /// Perform the node's effect inside durable steps and report how the
    /// context changes
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Everything a node sees while executing
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Static configuration of this node
    pub data: Value,

    /// Context as of the previous node's completion
    pub context: ExecutionContext,

    pub renderer: Arc<TemplateRenderer>,

    /// Durable step runner scoped to this node and run
    pub steps: StepRunner,

    /// Event emitter for real-time updates
    pub events: EventEmitter,
}

impl NodeContext {
    /// Render a template against the current context
    pub fn render(&self, template: &str) -> Result<String, NodeError> {
        self.renderer.render(template, &self.context)
    }

    /// Get a non-empty string config value or return error
    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        require_str(&self.data, name)
    }
}

/// Deserialize node configuration, reporting failures as configuration errors
pub fn parse_config<T: DeserializeOwned>(data: &Value) -> Result<T, NodeError> {
    T::deserialize(data).map_err(|e| NodeError::Configuration(format!("invalid node configuration: {}", e)))
}

/// Get a non-empty string from node configuration
pub fn require_str<'a>(data: &'a Value, name: &str) -> Result<&'a str, NodeError> {
    match data.get(name).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(NodeError::Configuration(format!("missing config: {}", name))),
    }
}

/// Result of a node execution
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub patch: ContextPatch,
}

impl NodeOutput {
    /// Leave the context as it is
    pub fn unchanged() -> Self {
        Self {
            patch: ContextPatch::Unchanged,
        }
    }

    /// Write one context key
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Self {
            patch: ContextPatch::set(key, value),
        }
    }

    /// Reinstate a committed context snapshot
    pub fn restore(values: serde_json::Map<String, Value>) -> Self {
        Self {
            patch: ContextPatch::Restore { values },
        }
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub fields: Vec<ConfigField>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            fields: Vec::new(),
        }
    }
}

/// One configuration field a node reads
#[derive(Debug, Clone)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ConfigField {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}
