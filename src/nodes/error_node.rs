//! Error node - fail the visit with a message.
//!
//! Useful at the end of an error branch, or to force a retry cycle.

use async_trait::async_trait;
use serde_json::Value;

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};
use crate::expression::value_to_string;

/// Error node implementation.
pub struct ErrorNode;

impl ErrorNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ErrorNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for ErrorNode {
    fn node_type(&self) -> &str {
        "error"
    }

    fn description(&self) -> &str {
        "Fail with the configured message"
    }

    async fn execute(&self, config: &Value, _ctx: &NodeContext) -> Result<NodeResult> {
        let message = config
            .get("message")
            .map(value_to_string)
            .unwrap_or_else(|| "Error node reached".to_string());
        Err(Error::Node(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_error_node_fails_with_message() {
        let node = ErrorNode::new();
        let ctx = NodeContext::new("exec-1", "wf");

        let err = node
            .execute(&json!({"message": "quota exhausted"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Node error: quota exhausted");
    }
}
