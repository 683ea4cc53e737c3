//! Wait/delay node - pause execution for a duration.
//!
//! The pause puts the execution in the WAITING state and wakes early when the
//! execution is cancelled.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::types::{Node, NodeContext, NodeResult};
use crate::error::{Error, Result};

/// Default cap on a single wait.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(60 * 60);

/// Wait/delay node that pauses execution.
pub struct WaitNode {
    max_wait: Duration,
}

impl WaitNode {
    pub fn new() -> Self {
        Self {
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    /// Override the longest permitted wait.
    pub fn with_max_wait(max_wait: Duration) -> Self {
        Self { max_wait }
    }
}

impl Default for WaitNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Deserialize)]
struct WaitConfig {
    /// Duration to wait in seconds (can be fractional, e.g., 0.5 for 500ms)
    #[serde(default)]
    seconds: Option<f64>,

    /// Duration to wait in milliseconds
    #[serde(default)]
    milliseconds: Option<u64>,

    /// Duration to wait in minutes
    #[serde(default)]
    minutes: Option<f64>,

    /// Wait until a specific RFC 3339 timestamp
    #[serde(default)]
    until: Option<String>,
}

#[async_trait]
impl Node for WaitNode {
    fn node_type(&self) -> &str {
        "wait"
    }

    fn description(&self) -> &str {
        "Pause execution for a specified duration or until a specific time"
    }

    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult> {
        let config: WaitConfig = serde_json::from_value(config.clone())
            .map_err(|e| Error::Node(format!("Invalid wait config: {}", e)))?;

        let wait_ms = calculate_wait_duration(&config, self.max_wait)?;

        if wait_ms > 0 {
            info!(
                "Wait node pausing for {}ms (execution: {})",
                wait_ms, ctx.execution_id
            );
            ctx.sleep(Duration::from_millis(wait_ms)).await?;
        }

        Ok(NodeResult::with_metadata(
            ctx.input.clone(),
            json!({
                "waited_ms": wait_ms,
            }),
        ))
    }
}

/// Calculate the wait duration in milliseconds from config.
fn calculate_wait_duration(config: &WaitConfig, max_wait: Duration) -> Result<u64> {
    if let Some(until) = &config.until {
        let target = chrono::DateTime::parse_from_rfc3339(until)
            .map_err(|e| Error::Node(format!("Invalid 'until' timestamp '{}': {}", until, e)))?;

        let now = chrono::Utc::now();
        let target_utc = target.with_timezone(&chrono::Utc);

        // In the past: no wait.
        if target_utc <= now {
            return Ok(0);
        }

        let total_ms = (target_utc - now).num_milliseconds().max(0) as u64;
        return check_cap(total_ms, max_wait);
    }

    let mut total_ms: u64 = 0;

    if let Some(minutes) = config.minutes {
        if minutes < 0.0 {
            return Err(Error::Node("Wait duration cannot be negative".to_string()));
        }
        total_ms += (minutes * 60.0 * 1000.0) as u64;
    }

    if let Some(seconds) = config.seconds {
        if seconds < 0.0 {
            return Err(Error::Node("Wait duration cannot be negative".to_string()));
        }
        total_ms += (seconds * 1000.0) as u64;
    }

    if let Some(ms) = config.milliseconds {
        total_ms += ms;
    }

    check_cap(total_ms, max_wait)
}

fn check_cap(total_ms: u64, max_wait: Duration) -> Result<u64> {
    let max_ms = max_wait.as_millis() as u64;
    if total_ms > max_ms {
        return Err(Error::Node(format!(
            "Wait duration {}ms exceeds maximum of {}ms",
            total_ms, max_ms
        )));
    }
    Ok(total_ms)
}
