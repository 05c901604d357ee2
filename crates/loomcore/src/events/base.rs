use crate::{ClassifiedError, NodeId, NodeKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type RunId = String;

/// Events emitted during a workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    RunStarted {
        run_id: RunId,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
        node_type: NodeKind,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        run_id: RunId,
        node_id: NodeId,
        /// Context key the node wrote, if any
        wrote: Option<String>,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        run_id: RunId,
        node_id: NodeId,
        error: ClassifiedError,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        run_id: RunId,
        node_id: NodeId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events specific to one node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    /// A committed step result was reused instead of running the work again
    StepReplayed { step: String },
    StepRetrying {
        step: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
}

/// Event emitter for nodes to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    run_id: RunId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(run_id: RunId, node_id: NodeId, sender: broadcast::Sender<ExecutionEvent>) -> Self {
        Self {
            run_id,
            node_id,
            sender,
        }
    }

    /// Emitter whose events go nowhere
    pub fn detached(run_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(run_id.into(), node_id.into(), sender)
    }

    /// Emit a node-specific event
    pub fn emit(&self, event: NodeEvent) {
        let _ = self.sender.send(ExecutionEvent::NodeEvent {
            run_id: self.run_id.clone(),
            node_id: self.node_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    /// Emit info message
    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    /// Emit warning message
    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }
}

/// Broadcast bus shared by all runs of a runtime
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, run_id: &str, node_id: &str) -> EventEmitter {
        EventEmitter::new(run_id.to_string(), node_id.to_string(), self.sender.clone())
    }
}
