//! Set node - add or update fields in object data.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Set node implementation.
pub struct SetNode;

impl SetNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SetConfig {
    fields: Fields,
    /// Start from the input object instead of an empty one
    #[serde(default = "default_keep_input")]
    keep_input: bool,
}

/// Either an ordered list of assignments or a plain map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Fields {
    List(Vec<SetField>),
    Map(Map<String, Value>),
}

#[derive(Debug, Deserialize)]
struct SetField {
    name: String,
    value: Value,
}

fn default_keep_input() -> bool {
    true
}

impl Fields {
    fn into_assignments(self) -> Vec<(String, Value)> {
        match self {
            Fields::List(list) => list.into_iter().map(|f| (f.name, f.value)).collect(),
            Fields::Map(map) => map.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Node for SetNode {
    fn node_type(&self) -> &str {
        "set"
    }

    fn description(&self) -> &str {
        "Set or update fields in object data"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: SetConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid set config: {}", e)))?;

        let assignments = config.fields.into_assignments();
        if assignments.is_empty() {
            return Err(Error::Node(
                "Set node requires at least one field assignment".to_string(),
            ));
        }

        let mut output = match (&ctx.input, config.keep_input) {
            (Value::Object(obj), true) => obj.clone(),
            _ => Map::new(),
        };

        for (name, value) in &assignments {
            if name.trim().is_empty() {
                return Err(Error::Node(
                    "Set node field name cannot be empty".to_string(),
                ));
            }
            set_path_value(&mut output, name, value.clone());
        }

        Ok(NodeResult::with_metadata(
            Value::Object(output),
            json!({
                "fields_set": assignments.len(),
            }),
        ))
    }
}

fn set_path_value(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        match entry.as_object_mut() {
            Some(map) => current = map,
            None => return,
        }
    }

    current.insert((*last).to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_add_fields() {
        let node = SetNode::new();
        let config = json!({
            "fields": [
                {"name": "status", "value": "processed"},
                {"name": "full_name", "value": "Nur Alya"}
            ]
        });

        let ctx = NodeContext::new("exec", "wf").with_input(json!({
            "first_name": "Nur",
            "last_name": "Alya"
        }));

        let result = node.execute(&config, &ctx).await.unwrap();
        assert_eq!(result.data["status"], "processed");
        assert_eq!(result.data["full_name"], "Nur Alya");
        assert_eq!(result.data["first_name"], "Nur");
    }

    #[tokio::test]
    async fn test_set_nested_field_from_map() {
        let node = SetNode::new();
        let config = json!({
            "fields": {"meta.source": "nodeflow", "meta.raw": {"order_id": "A-1"}},
            "keep_input": false
        });

        let ctx = NodeContext::new("exec", "wf").with_input(json!({"order_id": "A-1"}));
        let result = node.execute(&config, &ctx).await.unwrap();

        assert_eq!(result.data["meta"]["source"], "nodeflow");
        assert_eq!(result.data["meta"]["raw"], json!({"order_id": "A-1"}));
        assert!(result.data.get("order_id").is_none());
    }

    #[tokio::test]
    async fn test_set_requires_fields() {
        let node = SetNode::new();
        let ctx = NodeContext::new("exec", "wf");
        let err = node.execute(&json!({"fields": []}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("at least one field"));
    }
}
