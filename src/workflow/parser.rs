//! Workflow file parser (JSON or YAML).

use std::path::Path;

use super::types::Workflow;
use crate::error::{Error, Result};

/// Parse a workflow definition. JSON is detected by a leading `{`,
/// anything else is read as YAML.
pub fn parse_workflow(content: &str) -> Result<Workflow> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Err(Error::Parse("Empty workflow definition".to_string()));
    }

    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| describe(&e.to_string(), "JSON"))
    } else {
        serde_yaml::from_str(content).map_err(|e| describe(&e.to_string(), "YAML"))
    }
}

/// Parse a workflow from a file path.
pub async fn parse_workflow_file(path: &Path) -> Result<Workflow> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_workflow(&content)
}

/// Serialize a workflow to pretty JSON.
pub fn to_json(workflow: &Workflow) -> Result<String> {
    Ok(serde_json::to_string_pretty(workflow)?)
}

fn describe(message: &str, format: &str) -> Error {
    match extract_missing_field(message) {
        Some(field) => Error::Parse(format!("Missing required field: {}", field)),
        None => Error::Parse(format!("Invalid {}: {}", format, message)),
    }
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}
