//! Execution audit records and event emission.
//!
//! The recorder owns the [`Execution`] being built. Every change is appended
//! under a lock, forwarded to the registered listeners, and mirrored to
//! `tracing`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::metrics;
use crate::monitor::{ExecutionListener, LogCategory, LogEntry, LogLevel, NodeState};
use crate::nodes::WaitObserver;
use crate::storage::{Execution, ExecutionStatus, NodeExecution, NodeStatus};
use crate::workflow::{Connection, Node};

struct RecorderState {
    execution: Execution,
    /// Node visits currently parked in a wait
    waiting: usize,
}

/// Builds the execution record for one run. Cheap to clone; clones share
/// the same record.
#[derive(Clone)]
pub struct ExecutionRecorder {
    execution_id: String,
    state: Arc<Mutex<RecorderState>>,
    listeners: Arc<Vec<Arc<dyn ExecutionListener>>>,
}

impl ExecutionRecorder {
    pub fn new(execution: Execution, listeners: Vec<Arc<dyn ExecutionListener>>) -> Self {
        Self {
            execution_id: execution.id.clone(),
            state: Arc::new(Mutex::new(RecorderState {
                execution,
                waiting: 0,
            })),
            listeners: Arc::new(listeners),
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Move the execution to RUNNING.
    pub fn start(&self) {
        let (workflow_name, trigger_type) = {
            let mut state = self.lock();
            state.execution.status = ExecutionStatus::Running;
            state.execution.started_at = Utc::now();
            (
                state.execution.workflow_name.clone(),
                state.execution.trigger_type.to_string(),
            )
        };
        self.emit(
            self.entry(
                LogLevel::Info,
                LogCategory::ExecutionStart,
                format!("Execution started for workflow '{}'", workflow_name),
            )
            .with("workflow_name", workflow_name)
            .with("trigger_type", trigger_type),
        );
    }

    /// Open a RUNNING record for a node visit and return its index.
    pub fn begin_node(&self, node: &Node, input: &Value) -> usize {
        let index = {
            let mut state = self.lock();
            state.execution.node_executions.push(NodeExecution {
                id: uuid::Uuid::new_v4().to_string(),
                node_id: node.id.clone(),
                node_name: node.display_name().to_string(),
                node_type: node.node_type.clone(),
                status: NodeStatus::Running,
                input: input.clone(),
                output: None,
                started_at: Utc::now(),
                finished_at: None,
                duration_ms: None,
                error_message: None,
                attempts: 1,
            });
            state.execution.node_executions.len() - 1
        };

        self.emit(
            self.entry(
                LogLevel::Info,
                LogCategory::NodeStart,
                format!("Node '{}' ({}) started", node.id, node.node_type),
            )
            .with_node(&node.id)
            .with("node_type", node.node_type.clone()),
        );
        self.emit_state(&node.id, NodeState::Running);
        index
    }

    /// Note a failed attempt that is about to be retried.
    pub fn note_retry(&self, index: usize, attempt: u32, max_attempts: u32, error: &str, delay: Duration) {
        let node_id = self.update(index, |record| record.attempts = attempt);
        let Some(node_id) = node_id else {
            return;
        };
        self.emit(
            self.entry(
                LogLevel::Warn,
                LogCategory::Retry,
                format!(
                    "Node '{}' failed: {}. Attempt {}/{} in {}ms",
                    node_id,
                    error,
                    attempt,
                    max_attempts,
                    delay.as_millis()
                ),
            )
            .with_node(&node_id)
            .with("attempt", attempt)
            .with("max_attempts", max_attempts)
            .with("delay_ms", delay.as_millis() as u64),
        );
    }

    /// Close a visit as SUCCESS.
    pub fn finish_node(&self, index: usize, output: &Value) {
        let closed = self.close(index, NodeStatus::Success, Some(output.clone()), None);
        let Some((node_id, duration_ms)) = closed else {
            return;
        };
        self.emit(
            self.entry(
                LogLevel::Info,
                LogCategory::NodeEnd,
                format!("Node '{}' completed in {}ms", node_id, duration_ms),
            )
            .with_node(&node_id)
            .with("duration_ms", duration_ms),
        );
        self.emit_state(&node_id, NodeState::Success);
    }

    /// Close a visit as FAILED.
    pub fn fail_node(&self, index: usize, message: &str) {
        let closed = self.close(index, NodeStatus::Failed, None, Some(message.to_string()));
        let Some((node_id, duration_ms)) = closed else {
            return;
        };
        self.emit(
            self.entry(
                LogLevel::Error,
                LogCategory::Error,
                format!("Node '{}' failed: {}", node_id, message),
            )
            .with_node(&node_id)
            .with("duration_ms", duration_ms)
            .with("error", message),
        );
        self.emit_state(&node_id, NodeState::Failed);
    }

    /// Close a visit interrupted by cancellation.
    pub fn cancel_node(&self, index: usize) {
        let closed = self.close(
            index,
            NodeStatus::Cancelled,
            None,
            Some("Execution cancelled".to_string()),
        );
        if let Some((node_id, _)) = closed {
            self.emit(
                self.entry(
                    LogLevel::Warn,
                    LogCategory::Cancel,
                    format!("Node '{}' interrupted by cancellation", node_id),
                )
                .with_node(&node_id),
            );
            self.emit_state(&node_id, NodeState::Idle);
        }
    }

    /// Append a SKIPPED record for a node that will not run.
    pub fn skip_node(&self, node: &Node, input: Option<&Value>, reason: &str) {
        let now = Utc::now();
        self.lock().execution.node_executions.push(NodeExecution {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: node.id.clone(),
            node_name: node.display_name().to_string(),
            node_type: node.node_type.clone(),
            status: NodeStatus::Skipped,
            input: input.cloned().unwrap_or(Value::Null),
            output: input.cloned(),
            started_at: now,
            finished_at: Some(now),
            duration_ms: Some(0),
            error_message: None,
            attempts: 0,
        });
        metrics::record_node_execution(&node.node_type, "SKIPPED");

        self.emit(
            self.entry(
                LogLevel::Info,
                LogCategory::NodeSkip,
                format!("Node '{}' skipped: {}", node.id, reason),
            )
            .with_node(&node.id)
            .with("reason", reason),
        );
        self.emit_state(&node.id, NodeState::Skipped);
    }

    /// Note data moving along a connection.
    pub fn data_flow(&self, connection: &Connection) {
        self.emit(
            self.entry(
                LogLevel::Debug,
                LogCategory::DataFlow,
                format!(
                    "{}:{} -> {}:{}",
                    connection.source,
                    connection.source_port,
                    connection.target,
                    connection.target_port
                ),
            )
            .with_node(&connection.source)
            .with("connection_id", connection.id.clone())
            .with("target", connection.target.clone()),
        );
    }

    /// Emit a free-form entry for this execution.
    pub fn log(&self, level: LogLevel, category: LogCategory, node_id: Option<&str>, message: String) {
        let mut entry = self.entry(level, category, message);
        if let Some(node_id) = node_id {
            entry = entry.with_node(node_id);
        }
        self.emit(entry);
    }

    /// Close the execution and return the final record.
    ///
    /// Visits still open at this point were cut short and are marked
    /// CANCELLED.
    pub fn finish(&self, status: ExecutionStatus, output: Option<Value>, error: Option<&Error>) -> Execution {
        let execution = {
            let mut state = self.lock();
            let now = Utc::now();
            let execution = &mut state.execution;
            execution.status = status;
            execution.output = output;
            execution.finished_at = Some(now);
            if let Some(error) = error {
                execution.error_message = Some(error.to_string());
                execution.error_code = Some(error.code().to_string());
            }
            for record in execution
                .node_executions
                .iter_mut()
                .filter(|r| !r.status.is_terminal())
            {
                record.status = NodeStatus::Cancelled;
                record.finished_at = Some(now);
                record.duration_ms = Some((now - record.started_at).num_milliseconds());
            }
            let snapshot = execution.clone();
            state.waiting = 0;
            snapshot
        };

        let duration_ms = execution.duration_ms().unwrap_or(0);
        let (level, category) = match status {
            ExecutionStatus::Success => (LogLevel::Info, LogCategory::ExecutionEnd),
            ExecutionStatus::Cancelled => (LogLevel::Warn, LogCategory::Cancel),
            _ => (LogLevel::Error, LogCategory::ExecutionEnd),
        };
        let mut entry = self
            .entry(
                level,
                category,
                format!("Execution finished with status {} in {}ms", status, duration_ms),
            )
            .with("status", status.to_string())
            .with("duration_ms", duration_ms)
            .with("node_visits", execution.node_executions.len());
        if let Some(error) = error {
            entry = entry.with("error", error.to_json()["error"].clone());
        }
        self.emit(entry);
        execution
    }

    /// Copy of the record as it stands.
    pub fn snapshot(&self) -> Execution {
        self.lock().execution.clone()
    }

    fn update(&self, index: usize, apply: impl FnOnce(&mut NodeExecution)) -> Option<String> {
        let mut state = self.lock();
        let record = state.execution.node_executions.get_mut(index)?;
        apply(record);
        Some(record.node_id.clone())
    }

    fn close(
        &self,
        index: usize,
        status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Option<(String, i64)> {
        let (node_id, node_type, duration_ms) = {
            let mut state = self.lock();
            let record = state.execution.node_executions.get_mut(index)?;
            let now = Utc::now();
            let duration_ms = (now - record.started_at).num_milliseconds();
            record.status = status;
            record.output = output;
            record.error_message = error;
            record.finished_at = Some(now);
            record.duration_ms = Some(duration_ms);
            (record.node_id.clone(), record.node_type.clone(), duration_ms)
        };

        metrics::record_node_execution(&node_type, &status.to_string());
        metrics::record_node_duration(
            Duration::from_millis(duration_ms.max(0) as u64),
            &node_type,
        );
        Some((node_id, duration_ms))
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry(&self, level: LogLevel, category: LogCategory, message: String) -> LogEntry {
        LogEntry::new(level, category, &self.execution_id, message)
    }

    fn emit(&self, entry: LogEntry) {
        let node_id = entry.node_id.as_deref().unwrap_or("-");
        match entry.level {
            LogLevel::Debug => debug!(execution_id = %entry.execution_id, node_id, category = %entry.category, "{}", entry.message),
            LogLevel::Info => info!(execution_id = %entry.execution_id, node_id, category = %entry.category, "{}", entry.message),
            LogLevel::Warn => warn!(execution_id = %entry.execution_id, node_id, category = %entry.category, "{}", entry.message),
            LogLevel::Error => error!(execution_id = %entry.execution_id, node_id, category = %entry.category, "{}", entry.message),
        }
        for listener in self.listeners.iter() {
            listener.on_log(&entry);
        }
    }

    fn emit_state(&self, node_id: &str, state: NodeState) {
        for listener in self.listeners.iter() {
            listener.on_node_state(&self.execution_id, node_id, state);
        }
    }

    /// Observer that reports waits against the record at `index`.
    pub(crate) fn wait_observer(&self, index: usize) -> Arc<dyn WaitObserver> {
        Arc::new(VisitWaiter {
            recorder: self.clone(),
            index,
        })
    }

    fn set_node_waiting(&self, index: usize, waiting: bool) {
        let mut state = self.lock();
        let (from, to) = if waiting {
            (NodeStatus::Running, NodeStatus::Waiting)
        } else {
            (NodeStatus::Waiting, NodeStatus::Running)
        };
        if let Some(record) = state.execution.node_executions.get_mut(index) {
            if record.status == from {
                record.status = to;
            }
        }

        if waiting {
            state.waiting += 1;
        } else {
            state.waiting = state.waiting.saturating_sub(1);
        }
        let parked = state.waiting > 0;
        if !state.execution.status.is_terminal() {
            state.execution.status = if parked {
                ExecutionStatus::Waiting
            } else {
                ExecutionStatus::Running
            };
        }
    }
}

/// Wait reporting for one node visit. Parallel loop iterations visit the
/// same node concurrently, so the record is addressed by index.
struct VisitWaiter {
    recorder: ExecutionRecorder,
    index: usize,
}

impl WaitObserver for VisitWaiter {
    fn waiting(&self, node_id: &str, duration: Duration) {
        let recorder = &self.recorder;
        recorder.set_node_waiting(self.index, true);
        recorder.emit(
            recorder.entry(
                LogLevel::Info,
                LogCategory::Wait,
                format!("Node '{}' waiting {}ms", node_id, duration.as_millis()),
            )
            .with_node(node_id)
            .with("duration_ms", json!(duration.as_millis() as u64)),
        );
    }

    fn resumed(&self, node_id: &str) {
        let recorder = &self.recorder;
        recorder.set_node_waiting(self.index, false);
        recorder.emit(
            recorder.entry(
                LogLevel::Debug,
                LogCategory::Wait,
                format!("Node '{}' resumed", node_id),
            )
            .with_node(node_id),
        );
    }
}
