//! Node trait and context types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::credentials::Secret;
use crate::error::{Error, Result};
use crate::expression::{get_path_value, Evaluator, Scope};

/// How the engine routes a node's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeKind {
    /// Ready on the first delivery; routes on the selected ports
    #[default]
    Action,
    /// Ready once its inbound edges have delivered or been skipped
    Merge,
    /// Runs its `body` subgraph once per item, then routes on `done`
    Loop,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Merge => write!(f, "merge"),
            Self::Loop => write!(f, "loop"),
        }
    }
}

/// Result of node execution.
#[derive(Debug, Clone)]
pub struct NodeResult {
    /// Output data from the node
    pub data: Value,
    /// Metadata (timing, debug info, etc.)
    pub metadata: Value,
    /// Output ports to route on. `None` routes every non-error edge.
    pub ports: Option<Vec<String>>,
}

impl NodeResult {
    /// Create a new result with just data.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            metadata: serde_json::json!({}),
            ports: None,
        }
    }

    /// Create a result with data and metadata.
    pub fn with_metadata(data: Value, metadata: Value) -> Self {
        Self {
            data,
            metadata,
            ports: None,
        }
    }

    /// Create an empty result.
    pub fn empty() -> Self {
        Self::new(Value::Null)
    }

    /// Route only on `port`.
    pub fn on_port(mut self, port: &str) -> Self {
        self.ports = Some(vec![port.to_string()]);
        self
    }

    /// Route on each of `ports`.
    pub fn on_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = Some(ports.into_iter().map(Into::into).collect());
        self
    }

    /// Whether a result selects `port`.
    pub fn selects(&self, port: &str) -> bool {
        match &self.ports {
            Some(ports) => ports.iter().any(|p| p == port),
            None => port != crate::workflow::ERROR_PORT,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        self.data.as_array()
    }
}

/// One delivery on an inbound connection.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub connection_id: String,
    /// Source node id
    pub source: String,
    /// Target port the delivery arrived on
    pub port: String,
    pub data: Value,
}

/// Notified when a node parks on an external event.
pub trait WaitObserver: Send + Sync {
    fn waiting(&self, node_id: &str, duration: Duration);
    fn resumed(&self, node_id: &str);
}

/// Context passed to a node during execution.
#[derive(Clone)]
pub struct NodeContext {
    /// Assembled input (single delivery, object keyed by source, or the
    /// execution input for trigger nodes)
    pub input: Value,

    /// Raw deliveries, in arrival order
    pub inputs: Vec<Inbound>,

    /// All node outputs so far (keyed by node ID)
    pub node_outputs: HashMap<String, Value>,

    /// Plain variables visible to the node
    pub variables: HashMap<String, Value>,

    /// Execution ID
    pub execution_id: String,

    /// Workflow name
    pub workflow_name: String,

    /// Node being visited
    pub node_id: String,

    /// Current item index inside a loop body
    pub item_index: Option<usize>,

    /// Credential resolved for this visit only
    pub credential: Option<Secret>,

    pub cancel: CancellationToken,

    pub evaluator: Evaluator,

    pub(crate) waiter: Option<Arc<dyn WaitObserver>>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("execution_id", &self.execution_id)
            .field("node_id", &self.node_id)
            .field("input", &self.input)
            .field("item_index", &self.item_index)
            .finish_non_exhaustive()
    }
}

impl NodeContext {
    /// Create a new context.
    pub fn new(execution_id: &str, workflow_name: &str) -> Self {
        Self {
            input: Value::Null,
            inputs: Vec::new(),
            node_outputs: HashMap::new(),
            variables: HashMap::new(),
            execution_id: execution_id.to_string(),
            workflow_name: workflow_name.to_string(),
            node_id: String::new(),
            item_index: None,
            credential: None,
            cancel: CancellationToken::new(),
            evaluator: Evaluator::new(),
            waiter: None,
        }
    }

    /// Set the input data.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// Set the raw deliveries.
    pub fn with_inputs(mut self, inputs: Vec<Inbound>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_variable(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Add a node output.
    pub fn add_output(&mut self, node_id: &str, output: Value) {
        self.node_outputs.insert(node_id.to_string(), output);
    }

    /// Get a previous node's output.
    pub fn get_output(&self, node_id: &str) -> Option<&Value> {
        self.node_outputs.get(node_id)
    }

    /// Evaluate a template with `${item...}` bound to `item`.
    pub fn evaluate_with_item(&self, template: &str, item: &Value) -> Result<String> {
        let scope = ItemScope { item, ctx: self };
        self.evaluator.evaluate(template, &scope)
    }

    /// Park for `duration`, waking early with [`Error::Cancelled`].
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if let Some(waiter) = &self.waiter {
            waiter.waiting(&self.node_id, duration);
        }
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        };
        if let Some(waiter) = &self.waiter {
            waiter.resumed(&self.node_id);
        }
        outcome
    }
}

impl Scope for NodeContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        let (head, path) = name.split_once('.').unwrap_or((name, ""));
        if head == "input" {
            return get_path_value(&self.input, path);
        }
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.variables.get(head) {
            return get_path_value(value, path);
        }
        get_path_value(self.node_outputs.get(head)?, path)
    }
}

struct ItemScope<'a> {
    item: &'a Value,
    ctx: &'a NodeContext,
}

impl Scope for ItemScope<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        match name.split_once('.') {
            None if name == "item" => Some(self.item.clone()),
            Some(("item", path)) => get_path_value(self.item, path),
            _ => self.ctx.lookup(name),
        }
    }
}

/// Trait that all node types must implement.
#[async_trait]
pub trait Node: Send + Sync {
    /// Get the node type name (e.g., "http", "set", "merge").
    fn node_type(&self) -> &str;

    /// Routing behavior the engine applies to this node.
    fn kind(&self) -> NodeKind {
        NodeKind::Action
    }

    /// Parameters the engine passes through without evaluating.
    fn raw_parameters(&self) -> &[&str] {
        &[]
    }

    /// Execute the node with the given configuration and context.
    ///
    /// # Arguments
    /// * `config` - Evaluated node parameters
    /// * `ctx` - Execution context with input data and previous outputs
    async fn execute(&self, config: &Value, ctx: &NodeContext) -> Result<NodeResult>;

    /// Get a description of this node type.
    fn description(&self) -> &str {
        "A workflow node"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_default_ports_exclude_error() {
        let result = NodeResult::new(json!(1));
        assert!(result.selects("main"));
        assert!(result.selects("anything"));
        assert!(!result.selects("error"));

        let result = result.on_port("true");
        assert!(result.selects("true"));
        assert!(!result.selects("main"));
    }

    #[test]
    fn test_context_scope() {
        let mut ctx = NodeContext::new("exec-1", "wf")
            .with_input(json!({"name": "Ada"}))
            .with_variable("limit", json!(3));
        ctx.add_output("fetch", json!({"items": [10, 20]}));

        assert_eq!(ctx.lookup("input.name"), Some(json!("Ada")));
        assert_eq!(ctx.lookup("limit"), Some(json!(3)));
        assert_eq!(ctx.lookup("fetch.items.1"), Some(json!(20)));
        assert_eq!(ctx.lookup("missing"), None);
    }

    #[test]
    fn test_evaluate_with_item() {
        let ctx = NodeContext::new("exec-1", "wf").with_variable("min", json!(5));
        let out = ctx
            .evaluate_with_item("gt(${item.score}, ${min})", &json!({"score": 9}))
            .unwrap();
        assert_eq!(out, "true");
    }

    struct Calls(Mutex<Vec<String>>);

    impl WaitObserver for Calls {
        fn waiting(&self, node_id: &str, _duration: Duration) {
            self.0.lock().unwrap().push(format!("wait:{}", node_id));
        }

        fn resumed(&self, node_id: &str) {
            self.0.lock().unwrap().push(format!("resume:{}", node_id));
        }
    }

    #[tokio::test]
    async fn test_sleep_notifies_observer() {
        let calls = Arc::new(Calls(Mutex::new(Vec::new())));
        let mut ctx = NodeContext::new("exec-1", "wf");
        ctx.node_id = "pause".to_string();
        ctx.waiter = Some(calls.clone());

        ctx.sleep(Duration::from_millis(5)).await.unwrap();
        assert_eq!(
            *calls.0.lock().unwrap(),
            vec!["wait:pause".to_string(), "resume:pause".to_string()]
        );
    }

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let ctx = NodeContext::new("exec-1", "wf");
        let token = ctx.cancel.clone();
        let handle = tokio::spawn(async move { ctx.sleep(Duration::from_secs(60)).await });
        token.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }
}
