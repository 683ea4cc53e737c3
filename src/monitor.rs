//! Structured execution events and live monitoring.
//!
//! The engine reports every record change to a list of [`ExecutionListener`]s.
//! [`Monitor`] is the stock listener: it fans events out to any number of
//! subscribers over a broadcast channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Maximum number of events to buffer in broadcast channel.
const BROADCAST_CAPACITY: usize = 1024;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What a log entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogCategory {
    ExecutionStart,
    ExecutionEnd,
    NodeStart,
    NodeEnd,
    NodeSkip,
    DataFlow,
    Error,
    Retry,
    Wait,
    Loop,
    Cancel,
}

impl std::fmt::Display for LogCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ExecutionStart => "EXECUTION_START",
            Self::ExecutionEnd => "EXECUTION_END",
            Self::NodeStart => "NODE_START",
            Self::NodeEnd => "NODE_END",
            Self::NodeSkip => "NODE_SKIP",
            Self::DataFlow => "DATA_FLOW",
            Self::Error => "ERROR",
            Self::Retry => "RETRY",
            Self::Wait => "WAIT",
            Self::Loop => "LOOP",
            Self::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}

/// One structured log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        category: LogCategory,
        execution_id: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            category,
            execution_id: execution_id.to_string(),
            node_id: None,
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    /// Attach a context field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Per-node state shown by live views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Idle,
    Running,
    Success,
    Failed,
    Skipped,
}

/// Receives execution events. Called synchronously from the engine, so
/// implementations must not block.
pub trait ExecutionListener: Send + Sync {
    fn on_log(&self, entry: &LogEntry);

    fn on_node_state(&self, _execution_id: &str, _node_id: &str, _state: NodeState) {}
}

/// Event types broadcast to monitor subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A structured log entry
    Log { entry: LogEntry },
    /// A node changed state
    NodeState {
        execution_id: String,
        node_id: String,
        state: NodeState,
    },
}

impl MonitorEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            Self::Log { entry } => &entry.execution_id,
            Self::NodeState { execution_id, .. } => execution_id,
        }
    }
}

/// Shared monitor state for broadcasting events.
#[derive(Clone)]
pub struct Monitor {
    tx: broadcast::Sender<MonitorEvent>,
}

impl Monitor {
    /// Create a new monitor.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event to all subscribers.
    pub fn broadcast(&self, event: MonitorEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.tx.send(event);
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionListener for Monitor {
    fn on_log(&self, entry: &LogEntry) {
        self.broadcast(MonitorEvent::Log {
            entry: entry.clone(),
        });
    }

    fn on_node_state(&self, execution_id: &str, node_id: &str, state: NodeState) {
        self.broadcast(MonitorEvent::NodeState {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry::new(LogLevel::Info, LogCategory::NodeStart, "exec-1", "start")
            .with_node("fetch")
            .with("attempt", 2);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["category"], "NODE_START");
        assert_eq!(value["level"], "info");
        assert_eq!(value["node_id"], "fetch");
        assert_eq!(value["context"]["attempt"], 2);
    }

    #[test]
    fn test_monitor_event_tag() {
        let event = MonitorEvent::NodeState {
            execution_id: "exec-1".to_string(),
            node_id: "a".to_string(),
            state: NodeState::Skipped,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "node_state", "execution_id": "exec-1", "node_id": "a", "state": "SKIPPED"})
        );
    }

    #[tokio::test]
    async fn test_monitor_broadcasts_to_subscribers() {
        let monitor = Monitor::new();
        let mut rx = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);

        monitor.on_log(&LogEntry::new(
            LogLevel::Warn,
            LogCategory::Retry,
            "exec-9",
            "retrying",
        ));
        monitor.on_node_state("exec-9", "a", NodeState::Running);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.execution_id(), "exec-9");
        assert!(matches!(first, MonitorEvent::Log { entry } if entry.category == LogCategory::Retry));

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            MonitorEvent::NodeState { state: NodeState::Running, .. }
        ));
    }

    #[test]
    fn test_broadcast_without_subscribers_is_ignored() {
        let monitor = Monitor::default();
        monitor.on_node_state("exec-1", "a", NodeState::Idle);
    }
}
