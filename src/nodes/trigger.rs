//! Trigger node - entry point that hands the execution input downstream.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{Node, NodeContext, NodeResult};
use crate::error::Result;

/// Trigger node implementation.
pub struct TriggerNode;

impl TriggerNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TriggerNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for TriggerNode {
    fn node_type(&self) -> &str {
        "trigger"
    }

    fn description(&self) -> &str {
        "Start the workflow with the execution input"
    }

    async fn execute(&self, _config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            json!({ "workflow": ctx.workflow_name }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_passes_input() {
        let node = TriggerNode::new();
        let ctx = NodeContext::new("exec-1", "orders").with_input(json!({"id": 1}));

        let result = node.execute(&json!({}), &ctx).await.unwrap();
        assert_eq!(result.data, json!({"id": 1}));
        assert_eq!(result.metadata["workflow"], "orders");
    }
}
