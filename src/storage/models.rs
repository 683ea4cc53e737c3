//! Execution records and persisted variables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::TriggerType;

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    /// Running, but parked on an external event
    Waiting,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Waiting)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "WAITING" => Ok(Self::Waiting),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// Status of a single node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub input: Value,
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Stable error code for failed or cancelled runs
    pub error_code: Option<String>,
    /// One record per node visit, in visit order
    pub node_executions: Vec<NodeExecution>,
}

impl Execution {
    /// A fresh PENDING execution.
    pub fn pending(id: &str, workflow_id: &str, workflow_name: &str, trigger_type: TriggerType, input: Value) -> Self {
        Self {
            id: id.to_string(),
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: ExecutionStatus::Pending,
            trigger_type,
            input,
            output: None,
            started_at: Utc::now(),
            finished_at: None,
            error_message: None,
            error_code: None,
            node_executions: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Records for one node, in visit order.
    pub fn visits_of<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a NodeExecution> + 'a {
        self.node_executions
            .iter()
            .filter(move |n| n.node_id == node_id)
    }

    /// The first failed visit, if any.
    pub fn failed_node(&self) -> Option<&NodeExecution> {
        self.node_executions
            .iter()
            .find(|n| n.status == NodeStatus::Failed)
    }
}

/// Audit record for one visit to one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: String,
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    /// Attempts made within this visit
    pub attempts: u32,
}

/// Scope of a persisted variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "workflow_id", rename_all = "snake_case")]
pub enum VariableScope {
    Global,
    Workflow(String),
}

impl Default for VariableScope {
    fn default() -> Self {
        Self::Global
    }
}

/// A persisted variable.
///
/// Secret variables hold a sealed value (see [`crate::credentials`]) and are
/// only decrypted when an expression reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: Value,
    #[serde(default)]
    pub scope: VariableScope,
    #[serde(default)]
    pub secret: bool,
}

impl Variable {
    pub fn global(name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            value,
            scope: VariableScope::Global,
            secret: false,
        }
    }

    pub fn workflow(workflow_id: &str, name: &str, value: Value) -> Self {
        Self {
            name: name.to_string(),
            value,
            scope: VariableScope::Workflow(workflow_id.to_string()),
            secret: false,
        }
    }

    /// A secret variable holding an already sealed value.
    pub fn secret(scope: VariableScope, name: &str, sealed: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Value::String(sealed.to_string()),
            scope,
            secret: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(ExecutionStatus::Running.is_running());
        assert!(ExecutionStatus::Waiting.is_running());
        assert!(!ExecutionStatus::Pending.is_running());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Waiting.is_terminal());
        assert!(NodeStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_status_round_trip_text() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Waiting,
            ExecutionStatus::Success,
            ExecutionStatus::Cancelled,
        ] {
            let parsed: ExecutionStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_uppercase() {
        let json = serde_json::to_value(NodeStatus::Skipped).unwrap();
        assert_eq!(json, "SKIPPED");
    }

    #[test]
    fn test_variable_scope_serde() {
        let var = Variable::workflow("wf-1", "limit", serde_json::json!(10));
        let json = serde_json::to_value(&var).unwrap();
        assert_eq!(json["scope"]["kind"], "workflow");
        assert_eq!(json["scope"]["workflow_id"], "wf-1");
        let back: Variable = serde_json::from_value(json).unwrap();
        assert_eq!(back.scope, VariableScope::Workflow("wf-1".to_string()));
    }
}
