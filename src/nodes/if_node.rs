//! IF node - two-way branch on the `true` and `false` ports.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};
use crate::expression::{is_truthy_value, value_to_string};

/// Port taken when the condition holds.
pub const TRUE_PORT: &str = "true";
/// Port taken otherwise.
pub const FALSE_PORT: &str = "false";

/// IF node implementation.
pub struct IfNode;

impl IfNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IfNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct IfConfig {
    /// Already evaluated expression, tested for truthiness
    #[serde(default)]
    condition: Option<Value>,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default = "default_match_mode")]
    match_mode: String, // "all" | "any"
}

#[derive(Debug, Deserialize)]
struct Condition {
    field: Value,
    operator: String,
    #[serde(default)]
    value: Value,
}

fn default_match_mode() -> String {
    "all".to_string()
}

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        "if"
    }

    fn description(&self) -> &str {
        "Evaluate a condition and route on the true or false port"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: IfConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid if config: {}", e)))?;

        let match_mode = config.match_mode.to_lowercase();
        if match_mode != "all" && match_mode != "any" {
            return Err(Error::Node(format!(
                "Invalid match_mode '{}', expected 'all' or 'any'",
                config.match_mode
            )));
        }

        let mut results = Vec::with_capacity(config.conditions.len() + 1);
        if let Some(condition) = &config.condition {
            results.push(is_truthy_value(condition));
        }
        for condition in &config.conditions {
            results.push(evaluate_condition(
                &condition.field,
                &condition.operator,
                &condition.value,
            )?);
        }

        if results.is_empty() {
            return Err(Error::Node(
                "IF node requires a condition or at least one entry in conditions".to_string(),
            ));
        }

        let condition_result = if match_mode == "any" {
            results.iter().any(|r| *r)
        } else {
            results.iter().all(|r| *r)
        };
        let port = if condition_result {
            TRUE_PORT
        } else {
            FALSE_PORT
        };

        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            json!({
                "condition_result": condition_result,
                "conditions_evaluated": results.len(),
                "match_mode": match_mode,
            }),
        )
        .on_port(port))
    }
}

pub(crate) fn evaluate_condition(left: &Value, operator: &str, right: &Value) -> Result<bool> {
    match operator {
        "equals" => Ok(loose_eq(left, right)),
        "not_equals" => Ok(!loose_eq(left, right)),
        "contains" => match left {
            Value::String(s) => Ok(right
                .as_str()
                .map(|needle| s.contains(needle))
                .unwrap_or(false)),
            Value::Array(items) => Ok(items.contains(right)),
            Value::Object(map) => Ok(right.as_str().map(|k| map.contains_key(k)).unwrap_or(false)),
            _ => Ok(false),
        },
        "gt" | "lt" | "gte" | "lte" => {
            let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) else {
                return Ok(false);
            };
            Ok(match operator {
                "gt" => l > r,
                "lt" => l < r,
                "gte" => l >= r,
                _ => l <= r,
            })
        }
        "is_empty" => Ok(!is_truthy_value(left)),
        "is_not_empty" => Ok(is_truthy_value(left)),
        "regex" => {
            let pattern = right
                .as_str()
                .ok_or_else(|| Error::Node("regex operator requires string pattern".to_string()))?;
            let regex = regex_lite::Regex::new(pattern)
                .map_err(|e| Error::Node(format!("Invalid regex '{}': {}", pattern, e)))?;
            Ok(regex.is_match(&value_to_string(left)))
        }
        _ => Err(Error::Node(format!("Unsupported operator '{}'", operator))),
    }
}

/// Equality that treats `"5"` and `5` as equal.
fn loose_eq(left: &Value, right: &Value) -> bool {
    if left == right {
        return true;
    }
    match (as_f64(left), as_f64(right)) {
        (Some(l), Some(r)) => l == r,
        _ => value_to_string(left) == value_to_string(right),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_if_node_condition_true() {
        let node = IfNode::new();
        let ctx = NodeContext::new("exec-1", "wf").with_input(json!({"n": 5}));

        let result = node
            .execute(&json!({"condition": true}), &ctx)
            .await
            .unwrap();
        assert!(result.selects("true"));
        assert!(!result.selects("false"));
        assert_eq!(result.data, json!({"n": 5}));
        assert_eq!(result.metadata["condition_result"], true);
    }

    #[tokio::test]
    async fn test_if_node_string_condition() {
        let node = IfNode::new();
        let ctx = NodeContext::new("exec-1", "wf");

        let result = node
            .execute(&json!({"condition": "false"}), &ctx)
            .await
            .unwrap();
        assert!(result.selects("false"));
    }

    #[tokio::test]
    async fn test_if_node_conditions_list() {
        let node = IfNode::new();
        let config = json!({
            "conditions": [
                {"field": "high", "operator": "equals", "value": "high"},
                {"field": 88, "operator": "gt", "value": 90}
            ],
            "match_mode": "any"
        });
        let ctx = NodeContext::new("exec-1", "wf");

        let result = node.execute(&config, &ctx).await.unwrap();
        assert!(result.selects("true"));
    }

    #[tokio::test]
    async fn test_if_node_requires_condition() {
        let node = IfNode::new();
        let ctx = NodeContext::new("exec-1", "wf");
        assert!(node.execute(&json!({}), &ctx).await.is_err());
    }

    #[test]
    fn test_operators() {
        assert!(evaluate_condition(&json!("5"), "equals", &json!(5)).unwrap());
        assert!(evaluate_condition(&json!([1, 2]), "contains", &json!(2)).unwrap());
        assert!(!evaluate_condition(&json!("abc"), "gt", &json!(1)).unwrap());
        assert!(evaluate_condition(&json!(""), "is_empty", &Value::Null).unwrap());
        assert!(evaluate_condition(&json!("ord-42"), "regex", &json!("^ord-\\d+$")).unwrap());
        assert!(evaluate_condition(&json!(1), "bogus", &json!(1)).is_err());
    }
}
