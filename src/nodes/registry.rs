//! Node registry - maps type strings to executors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::types::{Node, NodeContext, NodeResult};
use super::{
    DebugNode, ErrorNode, ExpressionNode, FilterNode, HttpNode, IfNode, LoopNode, MergeNode,
    SetNode, SortNode, SwitchNode, TriggerNode, WaitNode,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

/// Registry of available node types.
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn Node>>,
}

impl NodeRegistry {
    /// Create a new registry with default nodes.
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Built-in nodes, with limits taken from the engine config.
    pub fn with_config(config: &EngineConfig) -> Self {
        let mut registry = Self::empty();

        registry.register(Arc::new(TriggerNode::new()));
        registry.register(Arc::new(SetNode::new()));
        registry.register(Arc::new(IfNode::new()));
        registry.register(Arc::new(SwitchNode::new()));
        registry.register(Arc::new(MergeNode::new()));
        registry.register(Arc::new(LoopNode::new()));
        registry.register(Arc::new(WaitNode::with_max_wait(Duration::from_secs(
            config.max_wait_seconds,
        ))));
        registry.register(Arc::new(FilterNode::new()));
        registry.register(Arc::new(SortNode::new()));
        registry.register(Arc::new(ExpressionNode::new()));
        registry.register(Arc::new(DebugNode::new()));
        registry.register(Arc::new(ErrorNode::new()));
        registry.register(Arc::new(HttpNode::new()));

        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Register a node type. A later registration replaces an earlier one.
    pub fn register(&mut self, node: Arc<dyn Node>) {
        self.nodes.insert(node.node_type().to_string(), node);
    }

    /// Get a node by type name.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(node_type).cloned()
    }

    /// Get a node by type name, failing for unregistered types.
    pub fn resolve(&self, node_type: &str) -> Result<Arc<dyn Node>> {
        self.get(node_type)
            .ok_or_else(|| Error::Node(format!("Unsupported node type '{}'", node_type)))
    }

    /// Check if a node type is registered.
    pub fn has(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    /// Execute a node by type.
    pub async fn execute(
        &self,
        node_type: &str,
        config: &Value,
        ctx: &NodeContext,
    ) -> Result<NodeResult> {
        self.resolve(node_type)?.execute(config, ctx).await
    }

    /// List all registered node types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.nodes.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Get descriptions of all registered nodes, sorted by type.
    pub fn descriptions(&self) -> Vec<(&str, &str)> {
        let mut descriptions: Vec<(&str, &str)> = self
            .nodes
            .iter()
            .map(|(name, node)| (name.as_str(), node.description()))
            .collect();
        descriptions.sort_unstable();
        descriptions
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
