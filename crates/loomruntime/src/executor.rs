use crate::registry::NodeRegistry;
use crate::sort::topological_order;
use chrono::Utc;
use loomcore::{
    ClassifiedError, EventBus, ExecutionContext, ExecutionEvent, FlowError, NodeContext, NodeOutput, NodeSpec,
    RetryPolicy, StepJournal, StepRunner, TemplateRenderer, WorkflowGraph,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Executes a workflow graph one node at a time in topological order
pub struct WorkflowExecutor {
    registry: Arc<NodeRegistry>,
    journal: Arc<dyn StepJournal>,
    renderer: Arc<TemplateRenderer>,
    default_retry: RetryPolicy,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<NodeRegistry>, journal: Arc<dyn StepJournal>, default_retry: RetryPolicy) -> Self {
        Self {
            registry,
            journal,
            renderer: Arc::new(TemplateRenderer::new()),
            default_retry,
        }
    }

    pub fn journal(&self) -> &Arc<dyn StepJournal> {
        &self.journal
    }

    /// Execute a workflow run and return the final context.
    ///
    /// Re-executing with the same `run_id` resumes the run: nodes whose steps
    /// already committed get their recorded results back instead of running
    /// again.
    pub async fn execute(
        &self,
        workflow: &WorkflowGraph,
        run_id: &str,
        seed: ExecutionContext,
        event_bus: &EventBus,
    ) -> Result<ExecutionResult, RunFailure> {
        let start_time = Instant::now();

        event_bus.emit(ExecutionEvent::RunStarted {
            run_id: run_id.to_string(),
            workflow_id: workflow.id.clone(),
            timestamp: Utc::now(),
        });

        tracing::info!("Starting run {} of workflow {}", run_id, workflow.id);

        let mut context = seed;
        let mut completed_nodes = 0;
        let outcome = self
            .execute_nodes(workflow, run_id, &mut context, &mut completed_nodes, event_bus)
            .await;

        let duration_ms = start_time.elapsed().as_millis() as u64;

        event_bus.emit(ExecutionEvent::RunCompleted {
            run_id: run_id.to_string(),
            success: outcome.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        match outcome {
            Ok(()) => {
                tracing::info!("Run {} completed {} nodes in {}ms", run_id, completed_nodes, duration_ms);
                Ok(ExecutionResult {
                    run_id: run_id.to_string(),
                    workflow_id: workflow.id.clone(),
                    context,
                    completed_nodes,
                    total_nodes: workflow.nodes.len(),
                    duration_ms,
                })
            }
            Err(e) => {
                let error = e.classify();
                tracing::error!("Run {} aborted: {}", run_id, error);
                Err(RunFailure {
                    run_id: run_id.to_string(),
                    workflow_id: workflow.id.clone(),
                    error,
                    context,
                    completed_nodes,
                })
            }
        }
    }

    async fn execute_nodes(
        &self,
        workflow: &WorkflowGraph,
        run_id: &str,
        context: &mut ExecutionContext,
        completed_nodes: &mut usize,
        event_bus: &EventBus,
    ) -> Result<(), FlowError> {
        let order = topological_order(workflow)?;
        tracing::debug!(
            "Execution order: {:?}",
            order.iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
        );

        for (step, node_spec) in order.iter().enumerate() {
            tracing::info!(
                "Step {}/{}: executing node '{}' ({})",
                step + 1,
                order.len(),
                node_spec.id,
                node_spec.node_type
            );

            event_bus.emit(ExecutionEvent::NodeStarted {
                run_id: run_id.to_string(),
                node_id: node_spec.id.clone(),
                node_type: node_spec.node_type.clone(),
                timestamp: Utc::now(),
            });

            let start = Instant::now();
            match self.execute_node(node_spec, run_id, context, event_bus).await {
                Ok(output) => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    let wrote = output.patch.key().map(str::to_string);
                    *context = output.patch.apply(context);
                    *completed_nodes += 1;

                    tracing::info!("Node {} completed in {}ms", node_spec.id, duration_ms);
                    event_bus.emit(ExecutionEvent::NodeCompleted {
                        run_id: run_id.to_string(),
                        node_id: node_spec.id.clone(),
                        wrote,
                        duration_ms,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::error!("Node {} failed: {}", node_spec.id, e);
                    event_bus.emit(ExecutionEvent::NodeFailed {
                        run_id: run_id.to_string(),
                        node_id: node_spec.id.clone(),
                        error: e.classify(),
                        timestamp: Utc::now(),
                    });
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Dispatch one node: resolve its executor, validate its configuration,
    /// then let it run its durable steps
    async fn execute_node(
        &self,
        node_spec: &NodeSpec,
        run_id: &str,
        context: &ExecutionContext,
        event_bus: &EventBus,
    ) -> Result<NodeOutput, FlowError> {
        let node = self.registry.resolve(node_spec)?;
        node.validate(&node_spec.data)
            .map_err(|e| FlowError::node(&node_spec.id, e))?;

        let events = event_bus.create_emitter(run_id, &node_spec.id);
        let policy = node_spec
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.default_retry.clone());

        let ctx = NodeContext {
            node_id: node_spec.id.clone(),
            data: node_spec.data.clone(),
            context: context.clone(),
            renderer: self.renderer.clone(),
            steps: StepRunner::new(self.journal.clone(), run_id, &node_spec.id, policy, events.clone()),
            events,
        };

        node.execute(ctx)
            .await
            .map_err(|e| FlowError::node(&node_spec.id, e))
    }
}

/// Result of a successful run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: String,
    pub workflow_id: String,
    pub context: ExecutionContext,
    pub completed_nodes: usize,
    pub total_nodes: usize,
    pub duration_ms: u64,
}

/// A run aborted by a terminal error. `context` is the context as of the
/// last node that completed.
#[derive(Error, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("Run {run_id} failed: {error}")]
pub struct RunFailure {
    pub run_id: String,
    pub workflow_id: String,
    pub error: ClassifiedError,
    pub context: ExecutionContext,
    pub completed_nodes: usize,
}

impl RunFailure {
    /// Failure before any node ran, e.g. the graph could not be loaded
    pub fn before_start(run_id: impl Into<String>, workflow_id: impl Into<String>, error: FlowError) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            error: error.classify(),
            context: ExecutionContext::new(),
            completed_nodes: 0,
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.error.node_id.as_deref()
    }
}
