//! Error types for nodeflow.
//!
//! Every variant maps to a stable code so that callers (and the execution
//! record) can classify failures without parsing messages.

use thiserror::Error;

/// Result type alias for nodeflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// nodeflow error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed workflow graph. Raised before any node runs.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A node visit failed and nothing downstream consumed the failure.
    #[error("Node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// Failure raised by a node executor.
    #[error("Node error: {0}")]
    Node(String),

    #[error("Expression error: {0}")]
    Expression(String),

    /// Total node visits exceeded the step budget.
    #[error("Engine loop guard: exceeded {max_visits} node visits")]
    LoopGuard { max_visits: usize },

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Workflow error: {0}")]
    Workflow(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error code recorded on failed executions.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NodeExecution { .. } => "NODE_EXECUTION_ERROR",
            Error::Node(_) => "NODE_ERROR",
            Error::Expression(_) => "EXPRESSION_ERROR",
            Error::LoopGuard { .. } => "LOOP_GUARD_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Workflow(_) => "WORKFLOW_ERROR",
            Error::Execution(_) => "EXECUTION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Credential(_) => "CREDENTIAL_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Http(_) => "HTTP_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Errors that end the whole execution regardless of error routing.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Cancelled | Error::LoopGuard { .. } | Error::Timeout(_) | Error::Validation(_)
        )
    }

    /// Node id attached to the error, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Error::NodeExecution { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Convert to a JSON error response.
    pub fn to_json(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Some(node_id) = self.node_id() {
            error["node_id"] = serde_json::Value::String(node_id.to_string());
        }
        serde_json::json!({
            "success": false,
            "error": error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(Error::Expression("x".into()).code(), "EXPRESSION_ERROR");
        assert_eq!(Error::LoopGuard { max_visits: 3 }.code(), "LOOP_GUARD_ERROR");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_loop_guard_message() {
        let err = Error::LoopGuard { max_visits: 50 };
        assert_eq!(err.to_string(), "Engine loop guard: exceeded 50 node visits");
        assert!(err.is_fatal());
    }

    #[test]
    fn test_node_execution_to_json() {
        let err = Error::NodeExecution {
            node_id: "fetch".to_string(),
            message: "boom".to_string(),
        };
        let json = err.to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NODE_EXECUTION_ERROR");
        assert_eq!(json["error"]["node_id"], "fetch");
        assert!(!err.is_fatal());
    }
}
