use async_trait::async_trait;
use loomcore::{Node, NodeContext, NodeError, NodeKind, NodeMetadata, NodeOutput};
use serde_json::Value;

/// Trigger fired by hand from the editor.
///
/// Commits one checkpoint step carrying the seed context. A restarted run
/// gets that snapshot back from the journal and continues from it, whatever
/// seed the restart was given.
pub struct ManualTriggerNode;

#[async_trait]
impl Node for ManualTriggerNode {
    fn node_type(&self) -> NodeKind {
        NodeKind::ManualTrigger
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Start a workflow by hand".to_string(),
            category: "trigger".to_string(),
            fields: vec![],
        }
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let snapshot = ctx.context.to_json();
        let committed = ctx
            .steps
            .run("manual-trigger", || {
                let snapshot = snapshot.clone();
                async move { Ok::<_, NodeError>(snapshot) }
            })
            .await?;

        match committed {
            Value::Object(values) => Ok(NodeOutput::restore(values)),
            _ => Ok(NodeOutput::unchanged()),
        }
    }
}
