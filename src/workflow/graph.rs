//! Validated graph snapshot used by the scheduler.
//!
//! The graph only reports structure. Cycles are allowed: retry patterns route
//! back to earlier nodes, and the engine bounds them with its step budget.

use std::collections::{HashMap, HashSet, VecDeque};

use super::types::{Connection, Node, Workflow};
use crate::error::{Error, Result};

/// Immutable node/connection snapshot with adjacency indexes.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    /// node id -> index into `nodes`
    index: HashMap<String, usize>,
    /// node id -> indexes into `connections`, in declaration order
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl Graph {
    /// Validate a workflow and build its graph.
    ///
    /// Fails with [`Error::Validation`] on empty workflows, duplicate or empty
    /// node ids, dangling connection endpoints, duplicate connections, or when
    /// no node is free of incoming connections.
    pub fn build(workflow: &Workflow) -> Result<Self> {
        if workflow.nodes.is_empty() {
            return Err(Error::Validation(
                "Workflow must have at least one node".to_string(),
            ));
        }

        let mut index = HashMap::with_capacity(workflow.nodes.len());
        for (i, node) in workflow.nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "Node at position {} has an empty id",
                    i
                )));
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(Error::Validation(format!(
                    "Duplicate node ID: {}",
                    node.id
                )));
            }
        }

        let mut connections = Vec::with_capacity(workflow.connections.len());
        let mut seen_endpoints = HashSet::new();
        let mut seen_ids = HashSet::new();
        for conn in &workflow.connections {
            for (role, endpoint) in [("source", &conn.source), ("target", &conn.target)] {
                if !index.contains_key(endpoint) {
                    return Err(Error::Validation(format!(
                        "Connection {} references unknown {} node '{}'",
                        conn.endpoint_key(),
                        role,
                        endpoint
                    )));
                }
            }

            let key = conn.endpoint_key();
            if !seen_endpoints.insert(key.clone()) {
                return Err(Error::Validation(format!("Duplicate connection: {}", key)));
            }

            let mut conn = conn.clone();
            if conn.id.is_empty() {
                conn.id = key;
            }
            if !seen_ids.insert(conn.id.clone()) {
                return Err(Error::Validation(format!(
                    "Duplicate connection ID: {}",
                    conn.id
                )));
            }
            connections.push(conn);
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, conn) in connections.iter().enumerate() {
            outgoing.entry(conn.source.clone()).or_default().push(i);
            incoming.entry(conn.target.clone()).or_default().push(i);
        }

        let graph = Self {
            nodes: workflow.nodes.clone(),
            connections,
            index,
            outgoing,
            incoming,
        };

        if graph.trigger_nodes().is_empty() {
            return Err(Error::Validation(
                "Workflow has no trigger node (every node has an incoming connection)".to_string(),
            ));
        }

        Ok(graph)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Connections in declaration order, with ids filled in.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Nodes with no incoming connections, in declaration order.
    pub fn trigger_nodes(&self) -> Vec<&Node> {
        self.nodes
            .iter()
            .filter(|n| self.incoming.get(&n.id).map_or(true, |v| v.is_empty()))
            .collect()
    }

    /// Connections leaving `node_id`.
    pub fn outgoing(&self, node_id: &str) -> Vec<&Connection> {
        self.edges(&self.outgoing, node_id)
    }

    /// Connections entering `node_id`.
    pub fn incoming(&self, node_id: &str) -> Vec<&Connection> {
        self.edges(&self.incoming, node_id)
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Find a node by its display name.
    pub fn find_node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Every node reachable from the `port` output of `start`, without passing
    /// back through `start` itself.
    pub fn reachable_from_port(&self, start: &str, port: &str) -> HashSet<String> {
        let mut reached = HashSet::new();
        let mut queue: VecDeque<&str> = self
            .outgoing(start)
            .into_iter()
            .filter(|c| c.source_port == port)
            .map(|c| c.target.as_str())
            .collect();

        while let Some(id) = queue.pop_front() {
            if id == start || !reached.insert(id.to_string()) {
                continue;
            }
            for conn in self.outgoing(id) {
                queue.push_back(&conn.target);
            }
        }

        reached
    }

    /// Ids of connections that lie on a cycle: the target can reach the
    /// source again.
    pub fn cycle_connections(&self) -> HashSet<String> {
        self.connections
            .iter()
            .filter(|c| self.reaches(&c.target, &c.source))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Whether `to` is reachable from `from` along outgoing connections.
    pub fn reaches(&self, from: &str, to: &str) -> bool {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(id) = queue.pop_front() {
            if id == to {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            for conn in self.outgoing(id) {
                queue.push_back(&conn.target);
            }
        }
        false
    }

    fn edges(&self, table: &HashMap<String, Vec<usize>>, node_id: &str) -> Vec<&Connection> {
        table
            .get(node_id)
            .map(|ids| ids.iter().map(|&i| &self.connections[i]).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{TriggerType, WorkflowSettings};

    fn workflow(nodes: &[&str], connections: Vec<Connection>) -> Workflow {
        Workflow {
            id: "wf".to_string(),
            name: "test".to_string(),
            description: String::new(),
            nodes: nodes.iter().map(|id| Node::new(id, "debug")).collect(),
            connections,
            trigger_type: TriggerType::Manual,
            schedule: None,
            active: true,
            variables: Default::default(),
            settings: WorkflowSettings::default(),
        }
    }

    #[test]
    fn test_trigger_nodes_and_edges() {
        let wf = workflow(
            &["start", "a", "b"],
            vec![Connection::new("start", "a"), Connection::new("start", "b")],
        );
        let graph = Graph::build(&wf).unwrap();

        let triggers: Vec<_> = graph.trigger_nodes().iter().map(|n| n.id.clone()).collect();
        assert_eq!(triggers, vec!["start"]);
        assert_eq!(graph.outgoing("start").len(), 2);
        assert_eq!(graph.incoming("a").len(), 1);
        assert!(graph.incoming("start").is_empty());
        assert!(graph.find_node("b").is_some());
        assert!(graph.find_node("missing").is_none());
    }

    #[test]
    fn test_generated_connection_ids() {
        let wf = workflow(&["a", "b"], vec![Connection::new("a", "b")]);
        let graph = Graph::build(&wf).unwrap();
        assert_eq!(graph.connections()[0].id, "a:main->b:main");
    }

    #[test]
    fn test_dangling_connection_fails_validation() {
        let wf = workflow(&["a"], vec![Connection::new("a", "ghost")]);
        let err = Graph::build(&wf).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_connection_fails_validation() {
        let wf = workflow(
            &["a", "b"],
            vec![Connection::new("a", "b"), Connection::new("a", "b")],
        );
        let err = Graph::build(&wf).unwrap_err();
        assert!(err.to_string().contains("Duplicate connection"));
    }

    #[test]
    fn test_same_endpoints_on_different_ports_are_distinct() {
        let wf = workflow(
            &["a", "b"],
            vec![
                Connection::from_port("a", "true", "b"),
                Connection::from_port("a", "false", "b"),
            ],
        );
        assert!(Graph::build(&wf).is_ok());
    }

    #[test]
    fn test_duplicate_node_id_fails_validation() {
        let wf = workflow(&["a", "a"], vec![]);
        assert!(Graph::build(&wf).is_err());
    }

    #[test]
    fn test_cycles_are_permitted() {
        let wf = workflow(
            &["start", "attempt", "check"],
            vec![
                Connection::new("start", "attempt"),
                Connection::new("attempt", "check"),
                Connection::from_port("check", "false", "attempt"),
            ],
        );
        let graph = Graph::build(&wf).unwrap();
        assert_eq!(graph.incoming("attempt").len(), 2);
    }

    #[test]
    fn test_fully_cyclic_graph_has_no_trigger() {
        let wf = workflow(
            &["a", "b"],
            vec![Connection::new("a", "b"), Connection::new("b", "a")],
        );
        let err = Graph::build(&wf).unwrap_err();
        assert!(err.to_string().contains("no trigger node"));
    }

    #[test]
    fn test_empty_workflow_fails_validation() {
        let wf = workflow(&[], vec![]);
        assert!(matches!(Graph::build(&wf), Err(Error::Validation(_))));
    }

    #[test]
    fn test_reachable_from_port_stops_at_start() {
        let wf = workflow(
            &["start", "loop", "double", "after"],
            vec![
                Connection::new("start", "loop"),
                Connection::from_port("loop", "body", "double"),
                Connection::new("double", "loop"),
                Connection::from_port("loop", "done", "after"),
            ],
        );
        let graph = Graph::build(&wf).unwrap();
        let body = graph.reachable_from_port("loop", "body");
        assert_eq!(body.len(), 1);
        assert!(body.contains("double"));
    }

    #[test]
    fn test_cycle_connections() {
        let wf = workflow(
            &["start", "attempt", "check", "report"],
            vec![
                Connection::new("start", "attempt"),
                Connection::new("attempt", "check"),
                Connection::from_port("check", "false", "attempt"),
                Connection::from_port("check", "true", "report"),
            ],
        );
        let graph = Graph::build(&wf).unwrap();

        let cyclic = graph.cycle_connections();
        let mut ids: Vec<&str> = cyclic.iter().map(String::as_str).collect();
        ids.sort();
        assert_eq!(ids, vec!["attempt:main->check:main", "check:false->attempt:main"]);
        assert!(graph.reaches("start", "report"));
        assert!(!graph.reaches("report", "start"));
    }
}
