//! Switch node - multi-way branch selection by output port.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::if_node::evaluate_condition;
use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Port taken when no case matches.
pub const DEFAULT_PORT: &str = "default";

/// Switch node implementation.
pub struct SwitchNode;

impl SwitchNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SwitchNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct SwitchConfig {
    /// Evaluated value matched against the cases
    #[serde(alias = "field")]
    value: Value,
    #[serde(default)]
    cases: Vec<SwitchCase>,
    /// Port used when nothing matches
    #[serde(default, alias = "default_branch")]
    default_port: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SwitchCase {
    value: Value,
    #[serde(alias = "output", alias = "branch")]
    port: String,
    #[serde(default = "default_operator")]
    operator: String,
}

fn default_operator() -> String {
    "equals".to_string()
}

#[async_trait]
impl Node for SwitchNode {
    fn node_type(&self) -> &str {
        "switch"
    }

    fn description(&self) -> &str {
        "Route on the port of the first case matching a value"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: SwitchConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid switch config: {}", e)))?;

        let mut matched_case_index = None;
        for (idx, case) in config.cases.iter().enumerate() {
            if evaluate_condition(&config.value, &case.operator, &case.value)? {
                matched_case_index = Some(idx);
                break;
            }
        }

        let port = match matched_case_index {
            Some(idx) => config.cases[idx].port.clone(),
            None => config
                .default_port
                .clone()
                .unwrap_or_else(|| DEFAULT_PORT.to_string()),
        };

        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            json!({
                "selected_port": port,
                "matched_case_index": matched_case_index,
                "value": config.value,
                "cases_checked": config.cases.len(),
            }),
        )
        .on_port(&port))
    }
}
