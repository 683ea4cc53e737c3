//! Loop node - iterate the `body` subgraph once per item.
//!
//! The node itself only resolves the item list. The engine runs the nodes
//! reachable from the `body` port once per item (in batches of
//! `parallelism`), collects each iteration's result in item order, and routes
//! the aggregate array on the `done` port.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::types::{Node, NodeContext, NodeKind, NodeResult};
use crate::error::Result;

/// Port whose downstream subgraph runs once per item.
pub const BODY_PORT: &str = "body";
/// Port that receives the aggregated iteration results.
pub const DONE_PORT: &str = "done";

/// Loop node implementation.
pub struct LoopNode;

impl LoopNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoopNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for LoopNode {
    fn node_type(&self) -> &str {
        "loop"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Loop
    }

    fn description(&self) -> &str {
        "Run the body branch once per item and collect the results in order"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let source = config.get("items").unwrap_or(&ctx.input);
        let items = loop_items(source);
        let count = items.len();

        Ok(NodeResult::with_metadata(
            Value::Array(items),
            json!({ "item_count": count }),
        ))
    }
}

/// Normalize a value into the list of items to iterate.
pub fn loop_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Concurrent iterations requested by the evaluated parameters.
pub fn parallelism(config: &Value) -> Option<usize> {
    config
        .get("parallelism")
        .and_then(|v| v.as_u64())
        .map(|n| (n as usize).max(1))
}
