//! Sort node - sort array items by one or more fields.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::filter::resolve_item_field;
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Sort node implementation.
pub struct SortNode;

impl SortNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SortNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SortConfig {
    /// Items to sort; defaults to the node input
    #[serde(default)]
    items: Option<Value>,
    #[serde(default)]
    by: Vec<SortBy>,
}

#[derive(Debug, Deserialize)]
struct SortBy {
    field: String,
    #[serde(default = "default_order")]
    order: String, // asc | desc
}

fn default_order() -> String {
    "asc".to_string()
}

#[async_trait]
impl Node for SortNode {
    fn node_type(&self) -> &str {
        "sort"
    }

    fn description(&self) -> &str {
        "Sort an array by one or more fields"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: SortConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid sort config: {}", e)))?;

        for rule in &config.by {
            let order = rule.order.to_lowercase();
            if order != "asc" && order != "desc" {
                return Err(Error::Node(format!(
                    "Invalid sort order '{}' for field '{}', expected 'asc' or 'desc'",
                    rule.order, rule.field
                )));
            }
        }

        let source = config.items.as_ref().unwrap_or(&ctx.input);
        let Value::Array(items) = source else {
            return Err(Error::Node(
                "Sort node items must resolve to an array".to_string(),
            ));
        };
        let mut items = items.clone();

        // No rules: sort the items themselves.
        if config.by.is_empty() {
            items.sort_by(compare_values);
        } else {
            items.sort_by(|a, b| {
                for rule in &config.by {
                    let left = resolve_item_field(a, &rule.field);
                    let right = resolve_item_field(b, &rule.field);
                    let mut ord = compare_values(&left, &right);
                    if rule.order.eq_ignore_ascii_case("desc") {
                        ord = ord.reverse();
                    }

                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }

        let sorted_count = items.len();
        Ok(NodeResult::with_metadata(
            Value::Array(items),
            json!({
                "sorted_count": sorted_count,
                "sort_fields": config.by.len(),
            }),
        ))
    }
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(l), Value::Number(r)) => {
            let l = l.as_f64().unwrap_or(0.0);
            let r = r.as_f64().unwrap_or(0.0);
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        _ => left.to_string().cmp(&right.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sort_desc_then_asc() {
        let node = SortNode::new();
        let config = json!({
            "by": [
                {"field": "priority", "order": "desc"},
                {"field": "created_at", "order": "asc"}
            ]
        });
        let ctx = NodeContext::new("exec", "wf").with_input(json!([
            {"id": 1, "priority": 1, "created_at": "2026-01-03"},
            {"id": 2, "priority": 3, "created_at": "2026-01-02"},
            {"id": 3, "priority": 3, "created_at": "2026-01-01"}
        ]));

        let result = node.execute(&config, &ctx).await.unwrap();
        assert_eq!(result.data[0]["id"], 3);
        assert_eq!(result.data[1]["id"], 2);
        assert_eq!(result.data[2]["id"], 1);
    }

    #[tokio::test]
    async fn test_sort_scalars_without_rules() {
        let node = SortNode::new();
        let ctx = NodeContext::new("exec", "wf");
        let result = node
            .execute(&json!({"items": [3, null, 1, 2]}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.data, json!([null, 1, 2, 3]));
    }

    #[tokio::test]
    async fn test_sort_rejects_bad_order() {
        let node = SortNode::new();
        let ctx = NodeContext::new("exec", "wf").with_input(json!([]));
        let config = json!({"by": [{"field": "x", "order": "sideways"}]});
        assert!(node.execute(&config, &ctx).await.is_err());
    }
}
