//! Engine metrics.
//!
//! Recorded through the `metrics` facade. The library installs no recorder,
//! so these calls are no-ops until the host application installs one.
//!
//! ## Metrics
//!
//! ### Counters
//! - `nodeflow_executions_total` - Executions by status and trigger_type
//! - `nodeflow_node_visits_total` - Node visits by node_type and status
//! - `nodeflow_node_retries_total` - Retry attempts by node_type
//!
//! ### Histograms
//! - `nodeflow_execution_duration_seconds` - Execution duration by workflow
//! - `nodeflow_node_duration_seconds` - Node visit duration by node_type
//! - `nodeflow_loop_iterations` - Items per loop node run
//!
//! ### Gauges
//! - `nodeflow_active_executions` - Currently running executions

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Execution Metrics
// =============================================================================

/// Record a finished execution.
pub fn record_workflow_execution(status: &str, trigger_type: &str) {
    counter!(
        "nodeflow_executions_total",
        "status" => status.to_string(),
        "trigger_type" => trigger_type.to_string()
    )
    .increment(1);
}

/// Record execution duration.
pub fn record_workflow_duration(duration: Duration, workflow_name: &str) {
    histogram!(
        "nodeflow_execution_duration_seconds",
        "workflow" => workflow_name.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Increment active executions gauge.
pub fn inc_active_executions() {
    gauge!("nodeflow_active_executions").increment(1.0);
}

/// Decrement active executions gauge.
pub fn dec_active_executions() {
    gauge!("nodeflow_active_executions").decrement(1.0);
}

// =============================================================================
// Node Metrics
// =============================================================================

/// Record a node visit.
pub fn record_node_execution(node_type: &str, status: &str) {
    counter!(
        "nodeflow_node_visits_total",
        "node_type" => node_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record node visit duration.
pub fn record_node_duration(duration: Duration, node_type: &str) {
    histogram!(
        "nodeflow_node_duration_seconds",
        "node_type" => node_type.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a retry attempt.
pub fn record_node_retry(node_type: &str) {
    counter!(
        "nodeflow_node_retries_total",
        "node_type" => node_type.to_string()
    )
    .increment(1);
}

/// Record how many items a loop node iterated.
pub fn record_loop_iterations(count: usize) {
    histogram!("nodeflow_loop_iterations").record(count as f64);
}
