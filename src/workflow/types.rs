//! Workflow type definitions.
//!
//! A workflow is a set of typed nodes plus the connections between their
//! ports. The same structure is used for JSON and YAML files.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Port used when a connection does not name one.
pub const MAIN_PORT: &str = "main";

/// Port that receives a node's error object when the node fails.
pub const ERROR_PORT: &str = "error";

/// A complete workflow definition.
///
/// # Example YAML
///
/// ```yaml
/// id: greet
/// name: Greeting
/// nodes:
///   - id: start
///     type: trigger
///   - id: check
///     type: if
///     parameters:
///       condition: "gt(${count}, 3)"
///   - id: big
///     type: set
///     parameters:
///       fields:
///         size: big
/// connections:
///   - { source: start, target: check }
///   - { source: check, source_port: "true", target: big }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow id
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Nodes in declaration order
    pub nodes: Vec<Node>,

    /// Data-flow edges between node ports
    #[serde(default)]
    pub connections: Vec<Connection>,

    /// How this workflow is normally started
    #[serde(default, alias = "triggerType")]
    pub trigger_type: TriggerType,

    /// Schedule expression for scheduled workflows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Workflow-scoped variables declared inline
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,

    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_active() -> bool {
    true
}

impl Workflow {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Get a node by ID.
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// How a workflow run was started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Manual,
    Webhook,
    Schedule,
    Event,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Webhook => write!(f, "webhook"),
            Self::Schedule => write!(f, "schedule"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A node in the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID within the workflow
    pub id: String,

    /// Node type (selects the executor)
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default)]
    pub name: String,

    /// Parameters; string values may contain expressions
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Credential id resolved at visit time
    #[serde(default, alias = "credential_id", skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Disabled nodes are skipped and pass their input through
    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    /// Retry configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    /// Error handling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorConfig>,

    /// Per-visit timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl Node {
    /// Create a node with no parameters.
    pub fn new(id: &str, node_type: &str) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            name: String::new(),
            parameters: Map::new(),
            credential: None,
            disabled: false,
            notes: String::new(),
            retry: None,
            on_error: None,
            timeout_seconds: None,
        }
    }

    /// Set parameters from a JSON object. Non-object values are ignored.
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        if let Value::Object(map) = parameters {
            self.parameters = map;
        }
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// A directed edge from one node port to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id; generated from the endpoints when omitted
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(alias = "sourceNodeId")]
    pub source: String,

    #[serde(default = "default_port", alias = "sourcePort")]
    pub source_port: String,

    #[serde(alias = "targetNodeId")]
    pub target: String,

    #[serde(default = "default_port", alias = "targetPort")]
    pub target_port: String,
}

fn default_port() -> String {
    MAIN_PORT.to_string()
}

impl Connection {
    /// Connect the main ports of two nodes.
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: String::new(),
            source: source.to_string(),
            source_port: default_port(),
            target: target.to_string(),
            target_port: default_port(),
        }
    }

    /// Connect a named output port of `source` to `target`.
    pub fn from_port(source: &str, port: &str, target: &str) -> Self {
        Self {
            source_port: port.to_string(),
            ..Self::new(source, target)
        }
    }

    /// Identity of the edge used for duplicate detection.
    pub fn endpoint_key(&self) -> String {
        format!(
            "{}:{}->{}:{}",
            self.source, self.source_port, self.target, self.target_port
        )
    }
}

/// Retry configuration for a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts within one visit
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffType,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

/// Error handling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorConfig {
    #[serde(default)]
    pub action: OnErrorAction,

    /// Output routed downstream when action is `fallback`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_value: Option<Value>,
}

/// What the engine does when a node visit fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorAction {
    /// Fail the execution unless an error port consumes the failure
    #[default]
    Fail,
    /// Route the error object on the normal ports
    Continue,
    /// Route `fallback_value` on the normal ports
    Fallback,
}

/// Per-workflow overrides of engine limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Maximum execution time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Step budget: maximum node visits per execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_node_visits: Option<usize>,

    /// Default concurrent iterations for loop nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_parallelism: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_defaults_to_main_ports() {
        let conn: Connection = serde_json::from_value(json!({
            "source": "a",
            "target": "b"
        }))
        .unwrap();
        assert_eq!(conn.source_port, MAIN_PORT);
        assert_eq!(conn.target_port, MAIN_PORT);
        assert_eq!(conn.endpoint_key(), "a:main->b:main");
    }

    #[test]
    fn test_connection_accepts_camel_case_endpoints() {
        let conn: Connection = serde_json::from_value(json!({
            "id": "c1",
            "sourceNodeId": "check",
            "sourcePort": "true",
            "targetNodeId": "report"
        }))
        .unwrap();
        assert_eq!(conn.source, "check");
        assert_eq!(conn.source_port, "true");
        assert_eq!(conn.target, "report");
    }

    #[test]
    fn test_node_display_name_falls_back_to_id() {
        let node = Node::new("step1", "set");
        assert_eq!(node.display_name(), "step1");
        let named = node.with_name("Step One");
        assert_eq!(named.display_name(), "Step One");
    }

    #[test]
    fn test_error_config_defaults_to_fail() {
        let config: ErrorConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config.action, OnErrorAction::Fail);
    }
}
