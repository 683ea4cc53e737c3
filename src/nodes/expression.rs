//! Expression node - output the evaluated `value` parameter.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Expression node implementation.
pub struct ExpressionNode;

impl ExpressionNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExpressionNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for ExpressionNode {
    fn node_type(&self) -> &str {
        "expression"
    }

    fn description(&self) -> &str {
        "Output the evaluated value parameter"
    }

    async fn execute(&self, config: &Value, _ctx: &NodeContext) -> Result<NodeResult> {
        let value = config
            .get("value")
            .cloned()
            .ok_or_else(|| Error::Node("Expression node requires a 'value' parameter".to_string()))?;

        let output = match config.get("output_field").and_then(|v| v.as_str()) {
            Some(field) => json!({ field: value }),
            None => value,
        };
        Ok(NodeResult::new(output))
    }
}
