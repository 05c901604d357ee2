//! Durable steps.
//!
//! A step is an effectful unit of work whose successful result is committed to
//! a [`StepJournal`] keyed by `(run_id, step_name)`. Once a record exists the
//! work is never run again for that run; the committed result is returned
//! instead. Failed attempts commit nothing, so work must be safe to repeat
//! until it first succeeds.

use crate::{EventEmitter, JournalError, NodeError, NodeEvent, NodeId, RetryPolicy, RunId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A committed step result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub run_id: RunId,
    pub step_name: String,
    pub committed_result: Value,
    pub committed_at: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(run_id: impl Into<String>, step_name: impl Into<String>, committed_result: Value) -> Self {
        Self {
            run_id: run_id.into(),
            step_name: step_name.into(),
            committed_result,
            committed_at: Utc::now(),
        }
    }
}

/// Storage for committed step results
#[async_trait]
pub trait StepJournal: Send + Sync {
    /// Committed result for a step, if any
    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<Value>, JournalError>;

    /// Record a result. The first commit for a step wins; the value on record
    /// is returned.
    async fn commit(&self, run_id: &str, step_name: &str, result: Value) -> Result<Value, JournalError>;

    /// All records of a run in commit order
    async fn records(&self, run_id: &str) -> Result<Vec<StepRecord>, JournalError>;
}

/// Journal kept in process memory
#[derive(Default)]
pub struct MemoryJournal {
    runs: RwLock<HashMap<RunId, Vec<StepRecord>>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepJournal for MemoryJournal {
    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<Value>, JournalError> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(run_id)
            .and_then(|records| records.iter().find(|r| r.step_name == step_name))
            .map(|r| r.committed_result.clone()))
    }

    async fn commit(&self, run_id: &str, step_name: &str, result: Value) -> Result<Value, JournalError> {
        let mut runs = self.runs.write().await;
        let records = runs.entry(run_id.to_string()).or_default();
        if let Some(existing) = records.iter().find(|r| r.step_name == step_name) {
            return Ok(existing.committed_result.clone());
        }
        records.push(StepRecord::new(run_id, step_name, result.clone()));
        Ok(result)
    }

    async fn records(&self, run_id: &str) -> Result<Vec<StepRecord>, JournalError> {
        let runs = self.runs.read().await;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }
}

/// Runs durable steps on behalf of one node in one run
#[derive(Clone)]
pub struct StepRunner {
    journal: Arc<dyn StepJournal>,
    run_id: RunId,
    node_id: NodeId,
    policy: RetryPolicy,
    events: EventEmitter,
}

impl StepRunner {
    pub fn new(
        journal: Arc<dyn StepJournal>,
        run_id: impl Into<String>,
        node_id: impl Into<String>,
        policy: RetryPolicy,
        events: EventEmitter,
    ) -> Self {
        Self {
            journal,
            run_id: run_id.into(),
            node_id: node_id.into(),
            policy,
            events,
        }
    }

    /// Journal key: step names are scoped by node so two nodes of the same
    /// type never share a record
    pub fn key(&self, step_name: &str) -> String {
        format!("{}/{}", self.node_id, step_name)
    }

    /// Run `work` as a durable step.
    ///
    /// Returns the committed result without calling `work` if the step already
    /// committed in this run. Retriable failures are retried with backoff up
    /// to the policy's attempt limit; exhausting it yields a terminal
    /// [`NodeError::RetriesExhausted`]. Terminal failures return at once.
    pub async fn run<F, Fut>(&self, step_name: &str, mut work: F) -> Result<Value, NodeError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<Value, NodeError>> + Send,
    {
        let key = self.key(step_name);

        if let Some(cached) = self.journal.load(&self.run_id, &key).await? {
            tracing::debug!("Step {} already committed in run {}, reusing result", key, self.run_id);
            self.events.emit(NodeEvent::StepReplayed { step: key });
            return Ok(cached);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;

        loop {
            match work().await {
                Ok(value) => {
                    let committed = self.journal.commit(&self.run_id, &key, value).await?;
                    tracing::debug!("Step {} committed on attempt {}", key, attempt);
                    return Ok(committed);
                }
                Err(e) if e.is_retriable() => {
                    if attempt >= max_attempts {
                        tracing::error!("Step {} failed after {} attempts: {}", key, attempt, e);
                        return Err(NodeError::RetriesExhausted {
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        "Step {} attempt {}/{} failed: {}. Retrying in {}ms",
                        key,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    self.events.emit(NodeEvent::StepRetrying {
                        step: key.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: e.to_string(),
                    });

                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
