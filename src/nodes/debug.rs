//! Debug node - log data and pass the input through unchanged.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};
use crate::expression::get_path_value;

/// Debug node for logging and inspecting data.
pub struct DebugNode;

impl DebugNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DebugNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
enum DebugLevel {
    #[default]
    Info,
    Debug,
    Warn,
    Trace,
}

#[derive(Debug, Default, Deserialize)]
struct DebugConfig {
    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    level: DebugLevel,

    /// Log the full input
    #[serde(default)]
    log_input: bool,

    /// Log the plain variables visible to the node
    #[serde(default)]
    log_variables: bool,

    /// Specific fields to extract from the input
    #[serde(default)]
    fields: Option<Vec<String>>,

    #[serde(default)]
    label: Option<String>,
}

#[async_trait]
impl Node for DebugNode {
    fn node_type(&self) -> &str {
        "debug"
    }

    fn description(&self) -> &str {
        "Log data and pass the input through unchanged"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: DebugConfig = if config.is_null() {
            DebugConfig::default()
        } else {
            serde_json::from_value(config.clone())
                .map_err(|e| Error::Node(format!("Invalid debug config: {}", e)))?
        };

        let label = config.label.as_deref().unwrap_or(&ctx.node_id);
        let mut debug_info = Map::new();
        debug_info.insert("label".to_string(), json!(label));
        debug_info.insert("execution_id".to_string(), json!(ctx.execution_id));
        debug_info.insert("item_index".to_string(), json!(ctx.item_index));

        if let Some(message) = &config.message {
            debug_info.insert("message".to_string(), json!(message));
            log_message(&config.level, label, message);
        }

        if config.log_input {
            log_value(&config.level, label, "input", &ctx.input);
        }

        if let Some(fields) = &config.fields {
            let mut extracted = Map::new();
            for field in fields {
                let value = get_path_value(&ctx.input, field).unwrap_or(Value::Null);
                log_value(&config.level, label, &format!("field.{}", field), &value);
                extracted.insert(field.clone(), value);
            }
            debug_info.insert("fields".to_string(), Value::Object(extracted));
        }

        if config.log_variables {
            let variables: Map<String, Value> = ctx
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let variables = Value::Object(variables);
            log_value(&config.level, label, "variables", &variables);
            debug_info.insert("variables".to_string(), variables);
        }

        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            Value::Object(debug_info),
        ))
    }
}

fn log_message(level: &DebugLevel, label: &str, message: &str) {
    match level {
        DebugLevel::Info => info!("[{}] {}", label, message),
        DebugLevel::Debug => debug!("[{}] {}", label, message),
        DebugLevel::Warn => warn!("[{}] {}", label, message),
        DebugLevel::Trace => tracing::trace!("[{}] {}", label, message),
    }
}

fn log_value(level: &DebugLevel, label: &str, name: &str, value: &Value) {
    let formatted = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    match level {
        DebugLevel::Info => info!("[{}] {} = {}", label, name, formatted),
        DebugLevel::Debug => debug!("[{}] {} = {}", label, name, formatted),
        DebugLevel::Warn => warn!("[{}] {} = {}", label, name, formatted),
        DebugLevel::Trace => tracing::trace!("[{}] {} = {}", label, name, formatted),
    }
}
