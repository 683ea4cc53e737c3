//! Filter node - keep the array items that satisfy a condition.
//!
//! `condition` is evaluated once per item with `${item...}` bound to the
//! item, so the engine leaves it unevaluated.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::if_node::evaluate_condition;
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};
use crate::expression::{functions::is_truthy, get_path_value};

/// Filter node implementation.
pub struct FilterNode;

impl FilterNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FilterNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct FilterConfig {
    /// Items to filter; defaults to the node input
    #[serde(default)]
    items: Option<Value>,
    /// Per-item expression
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default = "default_match_mode")]
    match_mode: String, // all | any
}

#[derive(Debug, Deserialize)]
struct Condition {
    /// Dotted path into the item
    field: String,
    operator: String,
    #[serde(default)]
    value: Value,
}

fn default_match_mode() -> String {
    "all".to_string()
}

#[async_trait]
impl Node for FilterNode {
    fn node_type(&self) -> &str {
        "filter"
    }

    fn raw_parameters(&self) -> &[&str] {
        &["condition"]
    }

    fn description(&self) -> &str {
        "Filter an array with a per-item condition"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: FilterConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid filter config: {}", e)))?;

        if config.condition.is_none() && config.conditions.is_empty() {
            return Err(Error::Node(
                "Filter node requires a condition or at least one entry in conditions"
                    .to_string(),
            ));
        }

        let match_mode = config.match_mode.to_lowercase();
        if match_mode != "all" && match_mode != "any" {
            return Err(Error::Node(format!(
                "Invalid match_mode '{}', expected 'all' or 'any'",
                config.match_mode
            )));
        }

        let source = config.items.as_ref().unwrap_or(&ctx.input);
        let Value::Array(items) = source else {
            return Err(Error::Node(
                "Filter node items must resolve to an array".to_string(),
            ));
        };

        let original_count = items.len();
        let mut filtered = Vec::new();

        for item in items {
            let mut results = Vec::with_capacity(config.conditions.len() + 1);

            if let Some(condition) = &config.condition {
                results.push(is_truthy(&ctx.evaluate_with_item(condition, item)?));
            }
            for condition in &config.conditions {
                let left = resolve_item_field(item, &condition.field);
                results.push(evaluate_condition(&left, &condition.operator, &condition.value)?);
            }

            let include = if match_mode == "any" {
                results.iter().any(|r| *r)
            } else {
                results.iter().all(|r| *r)
            };

            if include {
                filtered.push(item.clone());
            }
        }

        let filtered_count = filtered.len();
        Ok(NodeResult::with_metadata(
            Value::Array(filtered),
            json!({
                "original_count": original_count,
                "filtered_count": filtered_count,
                "match_mode": match_mode,
            }),
        ))
    }
}

pub(crate) fn resolve_item_field(item: &Value, field: &str) -> Value {
    let path = field.trim();
    let path = path.strip_prefix("item.").unwrap_or(path);
    if path == "item" || path.is_empty() {
        return item.clone();
    }
    get_path_value(item, path).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filter_with_item_expression() {
        let node = FilterNode::new();
        let ctx = NodeContext::new("exec-1", "wf")
            .with_input(json!([{"score": 3}, {"score": 9}, {"score": 7}]))
            .with_variable("min", json!(5));

        let config = json!({"condition": "gt(${item.score}, ${min})"});
        let result = node.execute(&config, &ctx).await.unwrap();

        assert_eq!(result.data, json!([{"score": 9}, {"score": 7}]));
        assert_eq!(result.metadata["original_count"], 3);
        assert_eq!(result.metadata["filtered_count"], 2);
    }

    #[tokio::test]
    async fn test_filter_with_conditions_any() {
        let node = FilterNode::new();
        let ctx = NodeContext::new("exec-1", "wf");
        let config = json!({
            "items": [
                {"status": "active", "tier": "free"},
                {"status": "inactive", "tier": "pro"},
                {"status": "inactive", "tier": "free"}
            ],
            "conditions": [
                {"field": "status", "operator": "equals", "value": "active"},
                {"field": "item.tier", "operator": "equals", "value": "pro"}
            ],
            "match_mode": "any"
        });

        let result = node.execute(&config, &ctx).await.unwrap();
        assert_eq!(result.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_filter_requires_array() {
        let node = FilterNode::new();
        let ctx = NodeContext::new("exec-1", "wf").with_input(json!({"not": "array"}));
        let err = node
            .execute(&json!({"condition": "true"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_filter_condition_is_raw() {
        assert_eq!(FilterNode::new().raw_parameters(), &["condition"]);
    }
}
