use crate::{registry::NodeRegistry, ExecutionResult, RunFailure, RuntimeConfig, WorkflowExecutor};
use async_trait::async_trait;
use loomcore::{
    EventBus, ExecutionContext, ExecutionEvent, FlowError, JournalError, StepJournal, StepRecord, WorkflowError,
    WorkflowGraph,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Where workflow graphs come from
#[async_trait]
pub trait GraphSource: Send + Sync {
    async fn load_graph(&self, workflow_id: &str) -> Result<WorkflowGraph, WorkflowError>;
}

/// Graph source holding registered workflows in memory
#[derive(Default)]
pub struct WorkflowStore {
    workflows: RwLock<HashMap<String, WorkflowGraph>>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow, replacing any previous version
    pub async fn register_workflow(&self, workflow: WorkflowGraph) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id.clone(), workflow);
    }
}

#[async_trait]
impl GraphSource for WorkflowStore {
    async fn load_graph(&self, workflow_id: &str) -> Result<WorkflowGraph, WorkflowError> {
        let workflows = self.workflows.read().await;
        workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))
    }
}

/// What the trigger dispatcher hands to the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub workflow_id: String,
    /// Reuse an existing run id to resume that run
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub seed: serde_json::Map<String, serde_json::Value>,
}

impl TriggerEvent {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: None,
            seed: serde_json::Map::new(),
        }
    }

    pub fn with_seed(mut self, seed: serde_json::Map<String, serde_json::Value>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Main runtime for executing workflows
pub struct LoomRuntime {
    registry: Arc<NodeRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    graphs: Arc<dyn GraphSource>,
}

impl LoomRuntime {
    pub fn new(
        registry: Arc<NodeRegistry>,
        graphs: Arc<dyn GraphSource>,
        journal: Arc<dyn StepJournal>,
        config: &RuntimeConfig,
    ) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(registry.clone(), journal, config.retry.clone()));
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            executor,
            event_bus,
            graphs,
        }
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Start or resume a run for a trigger event
    pub async fn trigger(&self, event: TriggerEvent) -> Result<ExecutionResult, RunFailure> {
        let run_id = event.run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!("Trigger for workflow {} (run {})", event.workflow_id, run_id);

        let workflow = self
            .graphs
            .load_graph(&event.workflow_id)
            .await
            .map_err(|e| RunFailure::before_start(&run_id, &event.workflow_id, FlowError::from(e)))?;

        self.execute(&workflow, &run_id, event.seed).await
    }

    /// Execute a workflow directly (without a graph source)
    pub async fn execute(
        &self,
        workflow: &WorkflowGraph,
        run_id: &str,
        seed: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ExecutionResult, RunFailure> {
        self.executor
            .execute(workflow, run_id, ExecutionContext::from_seed(seed), &self.event_bus)
            .await
    }

    /// Committed steps of a run, for audit
    pub async fn step_records(&self, run_id: &str) -> Result<Vec<StepRecord>, JournalError> {
        self.executor.journal().records(run_id).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}
