use crate::WorkflowError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub type WorkflowId = String;
pub type NodeId = String;

/// Persisted node/connection graph, loaded read-only per run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub id: WorkflowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn connect(&mut self, from_node_id: impl Into<String>, to_node_id: impl Into<String>) {
        self.connections.push(Connection {
            from_node_id: from_node_id.into(),
            to_node_id: to_node_id.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check node id uniqueness and that every connection endpoint exists
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(WorkflowError::DuplicateNode(node.id.clone()));
            }
        }

        for conn in &self.connections {
            for endpoint in [&conn.from_node_id, &conn.to_node_id] {
                if !seen.contains(endpoint.as_str()) {
                    return Err(WorkflowError::InvalidConnection {
                        from: conn.from_node_id.clone(),
                        to: conn.to_node_id.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Node type. Known kinds have their own variant; anything else is kept
/// verbatim so the dispatcher can report it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    ManualTrigger,
    HttpRequest,
    Custom(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::ManualTrigger => "MANUAL_TRIGGER",
            NodeKind::HttpRequest => "HTTP_REQUEST",
            NodeKind::Custom(name) => name,
        }
    }
}

impl From<String> for NodeKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "MANUAL_TRIGGER" => NodeKind::ManualTrigger,
            "HTTP_REQUEST" => NodeKind::HttpRequest,
            _ => NodeKind::Custom(s),
        }
    }
}

impl From<&str> for NodeKind {
    fn from(s: &str) -> Self {
        NodeKind::from(s.to_string())
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node specification in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: NodeKind,
    #[serde(default = "empty_data")]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

fn empty_data() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<NodeKind>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: empty_data(),
            name: None,
            position: None,
            retry_policy: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        if let serde_json::Value::Object(map) = &mut self.data {
            map.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy {
            max_attempts,
            delay_ms,
            ..RetryPolicy::default()
        });
        self
    }
}

/// Directed ordering dependency: `from` completes before `to` starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from_node_id: NodeId,
    pub to_node_id: NodeId,
}

impl Connection {
    pub fn is_self_loop(&self) -> bool {
        self.from_node_id == self.to_node_id
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// Attempt policy for a durable step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(alias = "max_attempts")]
    pub max_attempts: u32,
    #[serde(alias = "delay_ms")]
    pub delay_ms: u64,
    #[serde(alias = "backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(alias = "max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1).min(20) as i32;
        let millis = (self.delay_ms as f64) * self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = millis.min(self.max_delay_ms as f64).max(0.0) as u64;
        std::time::Duration::from_millis(millis)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}
