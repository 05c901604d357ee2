use loomcore::{Node, NodeKind, NodeMetadata, NodeSpec, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Dispatch table from node type to executor.
///
/// Adding a node type means registering one more executor; the lookup itself
/// never changes.
pub struct NodeRegistry {
    executors: HashMap<NodeKind, Arc<dyn Node>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under the type it reports
    pub fn register(&mut self, executor: Arc<dyn Node>) {
        let node_type = executor.node_type();
        tracing::info!("Registering node type: {}", node_type);
        self.executors.insert(node_type, executor);
    }

    /// Find the executor for a node, failing for unsupported types
    pub fn resolve(&self, node: &NodeSpec) -> Result<Arc<dyn Node>, WorkflowError> {
        self.executors
            .get(&node.node_type)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.to_string(),
            })
    }

    /// Get all registered node types, sorted by name
    pub fn list_node_types(&self) -> Vec<NodeKind> {
        let mut types: Vec<NodeKind> = self.executors.keys().cloned().collect();
        types.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &NodeKind) -> Option<NodeMetadata> {
        self.executors.get(node_type).map(|e| e.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
