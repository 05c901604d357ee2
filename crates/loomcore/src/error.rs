use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Whether retrying can change the outcome of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Terminal,
    Retriable,
}

/// Where a failure originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Invalid or missing node configuration, caught before any IO
    Configuration,
    /// Cyclic graph, dangling connection, unknown node type
    Structural,
    /// Required JSON decoding failed
    Parse,
    /// Network/IO failure during an attempt
    Transient,
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node {node_id} failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    pub fn node(node_id: impl Into<String>, source: NodeError) -> Self {
        FlowError::Node {
            node_id: node_id.into(),
            source,
        }
    }

    /// Label this failure for the caller. Anything that reaches the run loop
    /// aborts the run, so a retriable node error surfacing here has already
    /// escaped its step and is reported as terminal.
    pub fn classify(&self) -> ClassifiedError {
        match self {
            FlowError::Node { node_id, source } => ClassifiedError {
                kind: ErrorKind::Terminal,
                category: source.category(),
                node_id: Some(node_id.clone()),
                message: source.to_string(),
            },
            FlowError::Workflow(e) => ClassifiedError {
                kind: ErrorKind::Terminal,
                category: ErrorCategory::Structural,
                node_id: e.node_id().map(str::to_string),
                message: e.to_string(),
            },
            FlowError::Journal(e) => ClassifiedError::terminal(ErrorCategory::Transient, None, e.to_string()),
            FlowError::Io(e) => ClassifiedError::terminal(ErrorCategory::Transient, None, e.to_string()),
            FlowError::Serialization(e) => ClassifiedError::terminal(ErrorCategory::Parse, None, e.to_string()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Step journal failure: {0}")]
    Journal(String),
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Transient(_) | NodeError::Timeout { .. } => ErrorKind::Retriable,
            _ => ErrorKind::Terminal,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            NodeError::Configuration(_) | NodeError::Template(_) => ErrorCategory::Configuration,
            NodeError::Parse(_) => ErrorCategory::Parse,
            NodeError::Transient(_)
            | NodeError::Timeout { .. }
            | NodeError::RetriesExhausted { .. }
            | NodeError::Journal(_) => ErrorCategory::Transient,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::Retriable
    }
}

impl From<JournalError> for NodeError {
    fn from(e: JournalError) -> Self {
        NodeError::Journal(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Connection {from} -> {to} references unknown node {missing}")]
    InvalidConnection {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Workflow contains a cycle (through node {node_id})")]
    CyclicDependency { node_id: String },

    #[error("Unsupported node type '{node_type}' for node {node_id}")]
    UnknownNodeType { node_id: String, node_type: String },
}

impl WorkflowError {
    /// Node most closely associated with the fault, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            WorkflowError::NotFound(_) => None,
            WorkflowError::DuplicateNode(id) => Some(id),
            WorkflowError::InvalidConnection { missing, .. } => Some(missing),
            WorkflowError::CyclicDependency { node_id } => Some(node_id),
            WorkflowError::UnknownNodeType { node_id, .. } => Some(node_id),
        }
    }
}

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("Journal IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt journal record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// A failure labeled for the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub node_id: Option<String>,
    pub message: String,
}

impl ClassifiedError {
    pub fn terminal(category: ErrorCategory, node_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Terminal,
            category,
            node_id,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ErrorKind::Terminal
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "[{:?}/{:?}] node {}: {}", self.kind, self.category, node_id, self.message),
            None => write!(f, "[{:?}/{:?}] {}", self.kind, self.category, self.message),
        }
    }
}
