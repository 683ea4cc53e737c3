//! Merge node - join deliveries from several inbound connections.
//!
//! The engine holds a merge node back until every required inbound edge has
//! delivered or been skipped (`wait: all`, the default), or releases it on the
//! first delivery (`wait: any`). `wait_for` narrows the required edges to the
//! listed source node ids.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::types::{Node, NodeContext, NodeKind, NodeResult};
use crate::error::{Error, Result};

/// Merge node implementation.
pub struct MergeNode;

impl MergeNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MergeNode {
    fn default() -> Self {
        Self::new()
    }
}

/// When a merge node becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    #[default]
    All,
    Any,
}

/// Join settings the scheduler reads from the node's parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinPolicy {
    #[serde(default)]
    pub wait: WaitMode,
    #[serde(default)]
    pub wait_for: Vec<String>,
}

impl JoinPolicy {
    pub fn from_parameters(parameters: &serde_json::Map<String, Value>) -> Self {
        Self {
            wait: parameters
                .get("wait")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
            wait_for: parameters
                .get("wait_for")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default(),
        }
    }

    /// Whether an edge from `source` must deliver or be skipped first.
    pub fn requires(&self, source: &str) -> bool {
        self.wait_for.is_empty() || self.wait_for.iter().any(|s| s == source)
    }
}

#[derive(Debug, Deserialize)]
struct MergeConfig {
    #[serde(default = "default_mode")]
    mode: String, // append | combine | zip | object
    #[serde(default)]
    wait_for: Vec<String>,
}

fn default_mode() -> String {
    "append".to_string()
}

#[async_trait]
impl Node for MergeNode {
    fn node_type(&self) -> &str {
        "merge"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Merge
    }

    fn description(&self) -> &str {
        "Wait for inbound branches and merge them by append, combine, zip, or object mode"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: MergeConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid merge config: {}", e)))?;
        let mode = config.mode.to_lowercase();
        let sources = collect_sources(ctx, &config.wait_for);
        let inputs_count = sources.len();

        let merged = match mode.as_str() {
            "append" => merge_append(sources),
            "combine" => merge_combine(sources)?,
            "zip" => merge_zip(sources)?,
            "object" => Value::Object(sources.into_iter().collect()),
            _ => {
                return Err(Error::Node(format!(
                    "Invalid merge mode '{}', expected append/combine/zip/object",
                    config.mode
                )))
            }
        };

        Ok(NodeResult::with_metadata(
            merged,
            json!({
                "mode": mode,
                "inputs_count": inputs_count,
            }),
        ))
    }
}

/// Deliveries as `(source, data)` pairs in arrival order, optionally narrowed
/// to `wait_for`. Without raw deliveries the assembled input is used.
fn collect_sources(ctx: &NodeContext, wait_for: &[String]) -> Vec<(String, Value)> {
    if !ctx.inputs.is_empty() {
        return ctx
            .inputs
            .iter()
            .filter(|i| wait_for.is_empty() || wait_for.contains(&i.source))
            .map(|i| (i.source.clone(), i.data.clone()))
            .collect();
    }

    if !wait_for.is_empty() {
        return wait_for
            .iter()
            .map(|id| (id.clone(), ctx.get_output(id).cloned().unwrap_or(Value::Null)))
            .collect();
    }

    vec![("input".to_string(), ctx.input.clone())]
}

fn merge_append(sources: Vec<(String, Value)>) -> Value {
    let mut out = Vec::new();
    for (_, source) in sources {
        if let Value::Array(items) = source {
            out.extend(items);
        } else {
            out.push(source);
        }
    }
    Value::Array(out)
}

fn merge_combine(sources: Vec<(String, Value)>) -> Result<Value> {
    let mut out = serde_json::Map::new();
    for (source_id, source) in sources {
        match source {
            Value::Object(map) => out.extend(map),
            other => {
                return Err(Error::Node(format!(
                    "merge combine mode requires object inputs, '{}' sent {}",
                    source_id,
                    type_name(&other)
                )))
            }
        }
    }
    Ok(Value::Object(out))
}

fn merge_zip(sources: Vec<(String, Value)>) -> Result<Value> {
    let arrays = sources
        .into_iter()
        .map(|(source_id, v)| match v {
            Value::Array(items) => Ok(items),
            other => Err(Error::Node(format!(
                "merge zip mode requires array inputs, '{}' sent {}",
                source_id,
                type_name(&other)
            ))),
        })
        .collect::<Result<Vec<Vec<Value>>>>()?;

    let min_len = arrays.iter().map(|a| a.len()).min().unwrap_or(0);
    let zipped = (0..min_len)
        .map(|idx| Value::Array(arrays.iter().map(|arr| arr[idx].clone()).collect()))
        .collect();

    Ok(Value::Array(zipped))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::Inbound;

    fn delivered(pairs: &[(&str, Value)]) -> NodeContext {
        let inputs = pairs
            .iter()
            .map(|(source, data)| Inbound {
                connection_id: format!("{}->m", source),
                source: source.to_string(),
                port: "main".to_string(),
                data: data.clone(),
            })
            .collect();
        NodeContext::new("exec-1", "wf").with_inputs(inputs)
    }

    #[tokio::test]
    async fn test_merge_append() {
        let node = MergeNode::new();
        let ctx = delivered(&[("a", json!([1, 2])), ("b", json!([3, 4]))]);

        let result = node.execute(&json!({"mode": "append"}), &ctx).await.unwrap();
        assert_eq!(result.data, json!([1, 2, 3, 4]));
        assert_eq!(result.metadata["inputs_count"], 2);
    }

    #[tokio::test]
    async fn test_merge_combine() {
        let node = MergeNode::new();
        let ctx = delivered(&[("a", json!({"x": 1})), ("b", json!({"y": 2}))]);

        let result = node.execute(&json!({"mode": "combine"}), &ctx).await.unwrap();
        assert_eq!(result.data, json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn test_merge_zip() {
        let node = MergeNode::new();
        let ctx = delivered(&[("a", json!([1, 2, 3])), ("b", json!(["a", "b"]))]);

        let result = node.execute(&json!({"mode": "zip"}), &ctx).await.unwrap();
        assert_eq!(result.data, json!([[1, "a"], [2, "b"]]));
    }

    #[tokio::test]
    async fn test_merge_object_mode_and_wait_for() {
        let node = MergeNode::new();
        let ctx = delivered(&[("a", json!(1)), ("b", json!(2)), ("c", json!(3))]);

        let config = json!({"mode": "object", "wait_for": ["a", "c"]});
        let result = node.execute(&config, &ctx).await.unwrap();
        assert_eq!(result.data, json!({"a": 1, "c": 3}));
    }

    #[test]
    fn test_join_policy_from_parameters() {
        let params = json!({"wait": "any", "wait_for": ["x"]});
        let policy = JoinPolicy::from_parameters(params.as_object().unwrap());
        assert_eq!(policy.wait, WaitMode::Any);
        assert!(policy.requires("x"));
        assert!(!policy.requires("y"));

        let policy = JoinPolicy::from_parameters(&serde_json::Map::new());
        assert_eq!(policy.wait, WaitMode::All);
        assert!(policy.requires("anything"));
    }
}
