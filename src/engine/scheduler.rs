//! Graph walk for one execution.
//!
//! A [`Walk`] visits the nodes of one scope: the main graph, or one loop
//! iteration's body. Ready nodes are visited in FIFO order. Each visit routes
//! its result along the selected outgoing connections and marks the others
//! dead. A node with several inbound connections waits until each one that
//! is not on a cycle has delivered or died. When the queue drains,
//! [`Walk::settle`] skips nodes whose inbound connections are all dead and
//! releases nodes whose joins can no longer grow. Cycles are allowed; every
//! visit draws from a shared budget.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::context::ExecutionContext;
use super::recorder::ExecutionRecorder;
use crate::credentials::{CredentialProvider, Secret};
use crate::error::{Error, Result};
use crate::expression::Evaluator;
use crate::metrics;
use crate::monitor::{LogCategory, LogLevel};
use crate::nodes::{
    loop_items, parallelism, Inbound, JoinPolicy, Node, NodeContext, NodeKind, NodeRegistry,
    NodeResult, WaitMode, BODY_PORT, DONE_PORT,
};
use crate::workflow::{
    BackoffType, Connection, Graph, Node as WorkflowNode, OnErrorAction, RetryConfig, ERROR_PORT,
};

/// Shared, read-only state of one execution.
pub(crate) struct Run {
    pub registry: Arc<NodeRegistry>,
    pub graph: Arc<Graph>,
    pub evaluator: Evaluator,
    pub recorder: ExecutionRecorder,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub cancel: CancellationToken,
    pub execution_id: String,
    pub workflow_name: String,
    /// Execution input, handed to trigger nodes
    pub input: Value,
    pub max_visits: usize,
    pub deadline: Instant,
    pub timeout_seconds: u64,
    pub loop_parallelism: usize,
    pub max_loop_items: usize,
    visits: AtomicUsize,
    /// Connections whose target can reach their source again
    cycle_edges: HashSet<String>,
    main_scope: Arc<HashSet<String>>,
    /// loop node id -> nodes its iterations visit
    loop_scopes: HashMap<String, Arc<HashSet<String>>>,
}

/// Settings that shape a run.
pub(crate) struct RunLimits {
    pub max_visits: usize,
    pub timeout_seconds: u64,
    pub loop_parallelism: usize,
    pub max_loop_items: usize,
}

impl Run {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<NodeRegistry>,
        graph: Arc<Graph>,
        evaluator: Evaluator,
        recorder: ExecutionRecorder,
        credentials: Option<Arc<dyn CredentialProvider>>,
        cancel: CancellationToken,
        workflow_name: &str,
        input: Value,
        limits: RunLimits,
    ) -> Self {
        let (main_scope, loop_scopes) = partition_scopes(&registry, &graph);
        let cycle_edges = graph.cycle_connections();
        Self {
            execution_id: recorder.execution_id().to_string(),
            registry,
            graph,
            evaluator,
            recorder,
            credentials,
            cancel,
            workflow_name: workflow_name.to_string(),
            input,
            max_visits: limits.max_visits,
            deadline: Instant::now() + Duration::from_secs(limits.timeout_seconds),
            timeout_seconds: limits.timeout_seconds,
            loop_parallelism: limits.loop_parallelism.max(1),
            max_loop_items: limits.max_loop_items,
            visits: AtomicUsize::new(0),
            cycle_edges,
            main_scope: Arc::new(main_scope),
            loop_scopes: loop_scopes
                .into_iter()
                .map(|(id, scope)| (id, Arc::new(scope)))
                .collect(),
        }
    }

    /// Node visits made so far.
    pub fn visits(&self) -> usize {
        self.visits.load(Ordering::SeqCst)
    }

    /// Draw one visit from the budget.
    fn claim_visit(&self) -> Result<()> {
        let n = self.visits.fetch_add(1, Ordering::SeqCst) + 1;
        if n > self.max_visits {
            return Err(Error::LoopGuard {
                max_visits: self.max_visits,
            });
        }
        Ok(())
    }

    /// Fail fast once the run is cancelled or out of time.
    fn check_live(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(Error::Timeout(timeout_error_message(self.timeout_seconds)));
        }
        Ok(())
    }

    fn kind_of(&self, node: &WorkflowNode) -> NodeKind {
        self.registry
            .get(&node.node_type)
            .map(|n| n.kind())
            .unwrap_or_default()
    }
}

/// Split the graph into the main scope and one scope per loop node.
///
/// A loop's scope is everything reachable from its `body` port, minus the
/// bodies of loops nested inside it. The main scope is every node outside
/// all loop bodies.
fn partition_scopes(
    registry: &NodeRegistry,
    graph: &Graph,
) -> (HashSet<String>, HashMap<String, HashSet<String>>) {
    let bodies: HashMap<String, HashSet<String>> = graph
        .nodes()
        .iter()
        .filter(|n| registry.get(&n.node_type).map(|e| e.kind()) == Some(NodeKind::Loop))
        .map(|n| (n.id.clone(), graph.reachable_from_port(&n.id, BODY_PORT)))
        .collect();

    let mut scopes = HashMap::with_capacity(bodies.len());
    for (id, body) in &bodies {
        let nested: HashSet<&String> = body
            .iter()
            .filter_map(|member| bodies.get(member))
            .flatten()
            .collect();
        let scope = body
            .iter()
            .filter(|member| !nested.contains(member))
            .cloned()
            .collect();
        scopes.insert(id.clone(), scope);
    }

    let in_body: HashSet<&String> = bodies.values().flatten().collect();
    let main = graph
        .nodes()
        .iter()
        .map(|n| &n.id)
        .filter(|id| !in_body.contains(id))
        .cloned()
        .collect();

    (main, scopes)
}

/// Result of one loop iteration.
pub(crate) struct IterationOutcome {
    index: usize,
    value: Value,
    /// Outputs recorded by the body's nodes
    outputs: Vec<(String, Value)>,
}

/// Scheduler state for one scope.
pub(crate) struct Walk {
    run: Arc<Run>,
    members: Arc<HashSet<String>>,
    /// Loop node whose body this walk runs
    owner: Option<String>,
    ctx: ExecutionContext,
    ready: VecDeque<String>,
    queued: HashSet<String>,
    delivered: HashMap<String, Vec<Inbound>>,
    /// node id -> inbound connection ids that will not deliver
    dead: HashMap<String, HashSet<String>>,
    visited: HashSet<String>,
    skipped: HashSet<String>,
    last_output: Value,
    /// Value routed back to the owner loop node
    returned: Option<Value>,
}

impl Walk {
    /// Walk of the main graph, seeded with the trigger nodes.
    pub fn main(run: Arc<Run>, ctx: ExecutionContext) -> Self {
        let members = run.main_scope.clone();
        let mut walk = Self::new(run, members, None, ctx);
        let triggers: Vec<String> = walk
            .run
            .graph
            .trigger_nodes()
            .into_iter()
            .map(|n| n.id.clone())
            .filter(|id| walk.members.contains(id))
            .collect();
        for id in triggers {
            walk.enqueue(&id);
        }
        walk
    }

    fn new(
        run: Arc<Run>,
        members: Arc<HashSet<String>>,
        owner: Option<String>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            run,
            members,
            owner,
            ctx,
            ready: VecDeque::new(),
            queued: HashSet::new(),
            delivered: HashMap::new(),
            dead: HashMap::new(),
            visited: HashSet::new(),
            skipped: HashSet::new(),
            last_output: Value::Null,
            returned: None,
        }
    }

    /// Output of the last node visited.
    pub fn last_output(&self) -> &Value {
        &self.last_output
    }

    /// Visit ready nodes until nothing more can run.
    pub async fn drive(&mut self) -> Result<()> {
        loop {
            while let Some(id) = self.ready.pop_front() {
                self.queued.remove(&id);
                self.run.check_live()?;
                self.visit(&id).await?;
            }
            if !self.settle()? {
                return Ok(());
            }
        }
    }

    async fn visit(&mut self, node_id: &str) -> Result<()> {
        let run = self.run.clone();
        let node = run
            .graph
            .find_node(node_id)
            .ok_or_else(|| Error::Internal(format!("Node '{}' is not in the graph", node_id)))?;

        let mut inbound = self.delivered.remove(node_id).unwrap_or_default();
        let dead = self.dead.remove(node_id).unwrap_or_default();
        if run.kind_of(node) != NodeKind::Merge {
            self.add_earlier_outputs(node_id, &mut inbound, &dead);
        }
        let input = assemble_input(&inbound).unwrap_or_else(|| run.input.clone());

        run.claim_visit()?;
        self.visited.insert(node_id.to_string());

        if node.disabled {
            run.recorder.skip_node(node, Some(&input), "node is disabled");
            self.ctx.record_output(node_id, input.clone());
            self.last_output = input.clone();
            self.route(node, &NodeResult::new(input));
            return Ok(());
        }

        let idx = run.recorder.begin_node(node, &input);

        let outcome = async {
            let executor = run.registry.resolve(&node.node_type)?;
            let config = self.evaluate_parameters(node, executor.raw_parameters(), &input)?;
            let node_ctx = self.node_context(node, idx, &input, inbound).await?;
            let result = execute_with_retry(
                executor.clone(),
                node,
                &config,
                &node_ctx,
                &run.recorder,
                idx,
                run.deadline,
                run.timeout_seconds,
            )
            .await?;
            Ok::<_, Error>((executor, config, result))
        }
        .await;

        let result = match outcome {
            Ok((executor, config, result)) if executor.kind() == NodeKind::Loop => {
                match self.run_loop(node, &config, result).await {
                    Ok(result) => result,
                    Err(e) => return self.fail_visit(node, idx, e),
                }
            }
            Ok((_, _, result)) => result,
            Err(e) => return self.fail_visit(node, idx, e),
        };

        run.recorder.finish_node(idx, &result.data);
        self.ctx.record_output(node_id, result.data.clone());
        self.last_output = result.data.clone();
        self.route(node, &result);
        Ok(())
    }

    fn evaluate_parameters(
        &self,
        node: &WorkflowNode,
        raw: &[&str],
        input: &Value,
    ) -> Result<Value> {
        let scope = self.ctx.scope(input);
        let mut config = Map::with_capacity(node.parameters.len());
        for (key, value) in &node.parameters {
            let value = if raw.contains(&key.as_str()) {
                value.clone()
            } else {
                self.run.evaluator.evaluate_value(value, &scope)?
            };
            config.insert(key.clone(), value);
        }
        Ok(Value::Object(config))
    }

    async fn node_context(
        &self,
        node: &WorkflowNode,
        idx: usize,
        input: &Value,
        inbound: Vec<Inbound>,
    ) -> Result<NodeContext> {
        let credential = match &node.credential {
            Some(id) => Some(self.resolve_credential(id).await?),
            None => None,
        };

        let mut ctx = NodeContext::new(&self.run.execution_id, &self.run.workflow_name)
            .with_input(input.clone())
            .with_inputs(inbound)
            .with_cancel(self.run.cancel.clone());
        ctx.node_outputs = self.ctx.outputs().clone();
        ctx.variables = self.ctx.plain_variables();
        ctx.node_id = node.id.clone();
        ctx.item_index = self.ctx.loop_item().map(|(_, index)| index);
        ctx.credential = credential;
        ctx.evaluator = self.run.evaluator;
        ctx.waiter = Some(self.run.recorder.wait_observer(idx));
        Ok(ctx)
    }

    async fn resolve_credential(&self, credential_id: &str) -> Result<Secret> {
        let provider = self.run.credentials.as_ref().ok_or_else(|| {
            Error::Credential(format!(
                "Credential '{}' requested but no credential provider is configured",
                credential_id
            ))
        })?;
        provider.resolve(credential_id).await
    }

    /// Close a failed visit and apply the node's recovery, if any.
    fn fail_visit(&mut self, node: &WorkflowNode, idx: usize, error: Error) -> Result<()> {
        let recorder = &self.run.recorder;
        if error.is_fatal() {
            match error {
                Error::Cancelled => recorder.cancel_node(idx),
                _ => recorder.fail_node(idx, &error.to_string()),
            }
            return Err(error);
        }

        let message = error_message(&error);
        recorder.fail_node(idx, &message);
        let error_value = json!({
            "success": false,
            "error": message,
            "node_id": node.id,
        });

        let run = self.run.clone();
        let has_error_port = run
            .graph
            .outgoing(&node.id)
            .iter()
            .any(|c| c.source_port == ERROR_PORT);
        let action = node.on_error.as_ref().map(|c| c.action).unwrap_or_default();

        let recovered = if has_error_port {
            NodeResult::new(error_value).on_port(ERROR_PORT)
        } else {
            match action {
                OnErrorAction::Continue => NodeResult::new(error_value),
                OnErrorAction::Fallback => NodeResult::new(
                    node.on_error
                        .as_ref()
                        .and_then(|c| c.fallback_value.clone())
                        .unwrap_or(Value::Null),
                ),
                OnErrorAction::Fail => {
                    return Err(Error::NodeExecution {
                        node_id: node.id.clone(),
                        message,
                    })
                }
            }
        };

        debug!(
            "Node '{}' failure recovered ({})",
            node.id,
            if has_error_port { "error port" } else { "on_error" }
        );
        self.ctx.record_output(&node.id, recovered.data.clone());
        self.last_output = recovered.data.clone();
        self.route(node, &recovered);
        Ok(())
    }

    /// Deliver a result along the selected outgoing connections.
    fn route(&mut self, node: &WorkflowNode, result: &NodeResult) {
        let run = self.run.clone();
        for conn in run.graph.outgoing(&node.id) {
            let selected = result.selects(&conn.source_port);

            if self.owner.as_deref() == Some(conn.target.as_str()) {
                if selected {
                    self.returned = Some(result.data.clone());
                }
                continue;
            }
            if !self.members.contains(&conn.target) {
                continue;
            }

            if selected {
                self.deliver(conn, result.data.clone());
            } else {
                self.dead
                    .entry(conn.target.clone())
                    .or_default()
                    .insert(conn.id.clone());
            }
        }
    }

    fn deliver(&mut self, conn: &Connection, data: Value) {
        self.run.recorder.data_flow(conn);
        if let Some(dead) = self.dead.get_mut(&conn.target) {
            dead.remove(&conn.id);
        }
        self.delivered
            .entry(conn.target.clone())
            .or_default()
            .push(Inbound {
                connection_id: conn.id.clone(),
                source: conn.source.clone(),
                port: conn.target_port.clone(),
                data,
            });
        self.maybe_enqueue(&conn.target);
    }

    fn maybe_enqueue(&mut self, node_id: &str) {
        if self.queued.contains(node_id) {
            return;
        }
        let run = self.run.clone();
        let Some(node) = run.graph.find_node(node_id) else {
            return;
        };
        if run.kind_of(node) == NodeKind::Merge {
            let policy = JoinPolicy::from_parameters(&node.parameters);
            if policy.wait != WaitMode::Any && !self.join_complete(node_id, &policy, false) {
                return;
            }
        } else if !self.visited.contains(node_id) && !self.forward_resolved(node_id) {
            return;
        }
        self.enqueue(node_id);
    }

    /// Whether every inbound connection not on a cycle has delivered or died.
    /// Holds a fan-in node until its slower branches catch up.
    fn forward_resolved(&self, node_id: &str) -> bool {
        let delivered: HashSet<&str> = self
            .delivered
            .get(node_id)
            .map(|d| d.iter().map(|i| i.connection_id.as_str()).collect())
            .unwrap_or_default();
        let dead = self.dead.get(node_id);

        self.scoped_inbound(node_id)
            .iter()
            .filter(|c| !self.run.cycle_edges.contains(&c.id))
            .all(|c| {
                delivered.contains(c.id.as_str()) || dead.map_or(false, |d| d.contains(&c.id))
            })
    }

    /// Fill in the latest output of every predecessor that already ran but did
    /// not deliver this time. Nodes on a cycle only see what was delivered.
    fn add_earlier_outputs(
        &self,
        node_id: &str,
        inbound: &mut Vec<Inbound>,
        dead: &HashSet<String>,
    ) {
        let connections = self.scoped_inbound(node_id);
        if connections.len() < 2
            || connections
                .iter()
                .any(|c| self.run.cycle_edges.contains(&c.id))
        {
            return;
        }
        for conn in connections {
            if dead.contains(&conn.id)
                || !self.visited.contains(&conn.source)
                || inbound.iter().any(|i| i.source == conn.source)
            {
                continue;
            }
            if let Some(data) = self.ctx.output(&conn.source) {
                inbound.push(Inbound {
                    connection_id: conn.id.clone(),
                    source: conn.source.clone(),
                    port: conn.target_port.clone(),
                    data: data.clone(),
                });
            }
        }
    }

    fn enqueue(&mut self, node_id: &str) {
        if self.queued.insert(node_id.to_string()) {
            self.ready.push_back(node_id.to_string());
        }
    }

    /// Inbound connections that can deliver within this scope.
    fn scoped_inbound(&self, node_id: &str) -> Vec<Connection> {
        self.run
            .graph
            .incoming(node_id)
            .into_iter()
            .filter(|c| {
                self.members.contains(&c.source)
                    || (self.owner.as_deref() == Some(c.source.as_str())
                        && c.source_port == BODY_PORT)
            })
            .cloned()
            .collect()
    }

    /// Whether every required inbound connection has delivered, or, with
    /// `allow_dead`, delivered or died.
    fn join_complete(&self, node_id: &str, policy: &JoinPolicy, allow_dead: bool) -> bool {
        let delivered: HashSet<&str> = self
            .delivered
            .get(node_id)
            .map(|d| d.iter().map(|i| i.connection_id.as_str()).collect())
            .unwrap_or_default();
        let dead = self.dead.get(node_id);

        self.scoped_inbound(node_id)
            .iter()
            .filter(|c| policy.requires(&c.source))
            .all(|c| {
                delivered.contains(c.id.as_str())
                    || (allow_dead && dead.map_or(false, |d| d.contains(&c.id)))
            })
    }

    fn has_deliveries(&self, node_id: &str) -> bool {
        self.delivered.get(node_id).map_or(false, |d| !d.is_empty())
    }

    /// Resolve skips and stalled joins once the ready queue is empty.
    /// Returns whether any node became ready.
    fn settle(&mut self) -> Result<bool> {
        self.run.check_live()?;
        let run = self.run.clone();

        loop {
            let mut changed = false;
            for node in run.graph.nodes() {
                let id = &node.id;
                if !self.members.contains(id)
                    || self.visited.contains(id)
                    || self.skipped.contains(id)
                    || self.queued.contains(id)
                    || self.has_deliveries(id)
                {
                    continue;
                }
                let inbound = self.scoped_inbound(id);
                let dead = self.dead.get(id);
                let all_dead = !inbound.is_empty()
                    && inbound
                        .iter()
                        .all(|c| dead.map_or(false, |d| d.contains(&c.id)));
                if !all_dead {
                    continue;
                }

                run.recorder
                    .skip_node(node, None, "no inbound connection will deliver");
                self.skipped.insert(id.clone());
                for conn in run.graph.outgoing(id) {
                    if self.members.contains(&conn.target) {
                        self.dead
                            .entry(conn.target.clone())
                            .or_default()
                            .insert(conn.id.clone());
                    }
                }
                changed = true;
            }
            if !changed {
                break;
            }
        }

        let mut stalled = Vec::new();
        for node in run.graph.nodes() {
            let id = &node.id;
            if !self.members.contains(id)
                || self.queued.contains(id)
                || !self.has_deliveries(id)
            {
                continue;
            }
            let complete = if run.kind_of(node) == NodeKind::Merge {
                let policy = JoinPolicy::from_parameters(&node.parameters);
                self.join_complete(id, &policy, true)
            } else {
                self.forward_resolved(id)
            };
            if complete {
                self.enqueue(id);
            } else {
                stalled.push(id.clone());
            }
        }

        if self.ready.is_empty() {
            if let Some(id) = stalled.first() {
                warn!(
                    "Node '{}' released with partial input; remaining inbound connections cannot deliver",
                    id
                );
                self.enqueue(id);
            }
        }

        Ok(!self.ready.is_empty())
    }

    /// Run a loop node's body once per item and aggregate on `done`.
    async fn run_loop(
        &mut self,
        node: &WorkflowNode,
        config: &Value,
        result: NodeResult,
    ) -> Result<NodeResult> {
        let run = self.run.clone();
        let items = loop_items(&result.data);
        if items.len() > run.max_loop_items {
            return Err(Error::Node(format!(
                "Loop node '{}' received {} items, more than the limit of {}",
                node.id,
                items.len(),
                run.max_loop_items
            )));
        }

        let total = items.len();
        let batch = parallelism(config).unwrap_or(run.loop_parallelism).max(1);
        let members = run
            .loop_scopes
            .get(&node.id)
            .cloned()
            .unwrap_or_default();
        run.recorder.log(
            LogLevel::Info,
            LogCategory::Loop,
            Some(&node.id),
            format!(
                "Loop '{}' iterating {} items ({} at a time)",
                node.id, total, batch
            ),
        );
        metrics::record_loop_iterations(total);

        let mut results = vec![Value::Null; total];
        let mut items = items.into_iter().enumerate().peekable();

        while items.peek().is_some() {
            let mut outcomes = Vec::with_capacity(batch);
            if batch == 1 {
                if let Some((index, item)) = items.next() {
                    outcomes.push(
                        self.run_iteration(&node.id, members.clone(), item, index)
                            .await?,
                    );
                }
            } else {
                let mut join_set = JoinSet::new();
                for (index, item) in items.by_ref().take(batch) {
                    join_set.spawn(self.run_iteration(&node.id, members.clone(), item, index));
                }
                while let Some(joined) = join_set.join_next().await {
                    let failure = match joined {
                        Ok(Ok(outcome)) => {
                            outcomes.push(outcome);
                            continue;
                        }
                        Ok(Err(e)) => e,
                        Err(e) => Error::Internal(format!(
                            "Loop '{}' iteration task failed: {}",
                            node.id, e
                        )),
                    };
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Err(failure);
                }
                outcomes.sort_by_key(|o| o.index);
            }

            for outcome in outcomes {
                for (id, output) in outcome.outputs {
                    self.ctx.record_output(&id, output);
                }
                results[outcome.index] = outcome.value;
            }
        }

        Ok(NodeResult::with_metadata(
            Value::Array(results),
            json!({ "item_count": total, "parallelism": batch }),
        )
        .on_port(DONE_PORT))
    }

    /// One iteration of a loop body, as an independent walk.
    fn run_iteration(
        &self,
        loop_id: &str,
        members: Arc<HashSet<String>>,
        item: Value,
        index: usize,
    ) -> BoxFuture<'static, Result<IterationOutcome>> {
        let ctx = self.ctx.for_iteration(item.clone(), index);
        let mut walk = Walk::new(self.run.clone(), members, Some(loop_id.to_string()), ctx);
        let loop_id = loop_id.to_string();

        async move {
            let run = walk.run.clone();
            for conn in run.graph.outgoing(&loop_id) {
                if conn.source_port == BODY_PORT && walk.members.contains(&conn.target) {
                    walk.deliver(conn, item.clone());
                }
            }
            walk.drive().await?;

            let outputs = walk
                .members
                .iter()
                .filter_map(|id| walk.ctx.output(id).map(|v| (id.clone(), v.clone())))
                .collect();
            let value = walk.returned.take().unwrap_or(walk.last_output);
            Ok(IterationOutcome {
                index,
                value,
                outputs,
            })
        }
        .boxed()
    }
}

/// Input for a visit: nothing delivered means the node is a trigger, one
/// delivery is passed as-is, several form an object keyed by source node.
fn assemble_input(inbound: &[Inbound]) -> Option<Value> {
    match inbound {
        [] => None,
        [only] => Some(only.data.clone()),
        many => {
            let mut merged = Map::with_capacity(many.len());
            for delivery in many {
                merged.insert(delivery.source.clone(), delivery.data.clone());
            }
            Some(Value::Object(merged))
        }
    }
}

/// Message recorded for a failed visit.
fn error_message(error: &Error) -> String {
    match error {
        Error::Node(message) => message.clone(),
        Error::NodeExecution { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn timeout_error_message(timeout_seconds: u64) -> String {
    format!("Workflow timed out after {} seconds", timeout_seconds)
}

fn remaining_until(deadline: Instant) -> Option<Duration> {
    let now = Instant::now();
    if now >= deadline {
        None
    } else {
        Some(deadline.saturating_duration_since(now))
    }
}

pub(crate) fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.delay_ms;
    let ms = match config.backoff {
        BackoffType::Fixed => base,
        BackoffType::Linear => base.saturating_mul(attempt as u64),
        BackoffType::Exponential => {
            let shift = attempt.saturating_sub(1).min(20);
            base.saturating_mul(1u64 << shift)
        }
    };
    Duration::from_millis(ms)
}

#[allow(clippy::too_many_arguments)]
#[instrument(
    name = "node.execute",
    skip(executor, node, config, ctx, recorder, idx, deadline, timeout_seconds),
    fields(
        node_id = %node.id,
        node_type = %node.node_type,
        execution_id = %ctx.execution_id,
        item_index = ?ctx.item_index,
    )
)]
async fn execute_with_retry(
    executor: Arc<dyn Node>,
    node: &WorkflowNode,
    config: &Value,
    ctx: &NodeContext,
    recorder: &ExecutionRecorder,
    idx: usize,
    deadline: Instant,
    timeout_seconds: u64,
) -> Result<NodeResult> {
    let retry = node.retry.as_ref();
    let max_attempts = retry.map(|r| r.max_attempts.max(1)).unwrap_or(1);
    let node_timeout = node.timeout_seconds.map(Duration::from_secs);
    let mut attempt = 1u32;

    loop {
        let remaining = remaining_until(deadline)
            .ok_or_else(|| Error::Timeout(timeout_error_message(timeout_seconds)))?;
        let budget = node_timeout.map_or(remaining, |t| t.min(remaining));

        let outcome = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            outcome = timeout(budget, executor.execute(config, ctx)) => outcome,
        };

        let error = match outcome {
            Ok(Ok(result)) => return Ok(result),
            Ok(Err(e)) => e,
            Err(_) => match node_timeout {
                Some(limit) if limit <= remaining => Error::Node(format!(
                    "Node '{}' timed out after {} seconds",
                    node.id,
                    limit.as_secs()
                )),
                _ => return Err(Error::Timeout(timeout_error_message(timeout_seconds))),
            },
        };

        if error.is_fatal() || attempt >= max_attempts {
            return Err(error);
        }

        let delay = retry.map(|r| retry_delay(r, attempt)).unwrap_or_default();
        let remaining = remaining_until(deadline).unwrap_or_default();
        if delay > remaining {
            return Err(Error::Node(format!(
                "{} (retry delay exceeds remaining workflow timeout)",
                error_message(&error)
            )));
        }

        attempt = attempt.saturating_add(1);
        recorder.note_retry(idx, attempt, max_attempts, &error_message(&error), delay);
        metrics::record_node_retry(&node.node_type);

        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::parse_workflow;

    #[test]
    fn test_retry_delay_fixed() {
        let config = RetryConfig {
            max_attempts: 3,
            delay_ms: 500,
            backoff: BackoffType::Fixed,
        };

        assert_eq!(retry_delay(&config, 1), Duration::from_millis(500));
        assert_eq!(retry_delay(&config, 3), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_delay_linear() {
        let config = RetryConfig {
            max_attempts: 3,
            delay_ms: 200,
            backoff: BackoffType::Linear,
        };

        assert_eq!(retry_delay(&config, 1), Duration::from_millis(200));
        assert_eq!(retry_delay(&config, 2), Duration::from_millis(400));
        assert_eq!(retry_delay(&config, 3), Duration::from_millis(600));
    }

    #[test]
    fn test_retry_delay_exponential() {
        let config = RetryConfig {
            max_attempts: 4,
            delay_ms: 100,
            backoff: BackoffType::Exponential,
        };

        assert_eq!(retry_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(retry_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(retry_delay(&config, 4), Duration::from_millis(800));
    }

    #[test]
    fn test_assemble_input() {
        let delivery = |source: &str, data: Value| Inbound {
            connection_id: format!("{}->m", source),
            source: source.to_string(),
            port: "main".to_string(),
            data,
        };

        assert_eq!(assemble_input(&[]), None);
        assert_eq!(
            assemble_input(&[delivery("a", json!(1))]),
            Some(json!(1))
        );
        assert_eq!(
            assemble_input(&[delivery("a", json!(1)), delivery("b", json!(2))]),
            Some(json!({"a": 1, "b": 2}))
        );
    }

    #[test]
    fn test_partition_scopes_nested_loops() {
        let workflow = parse_workflow(
            r#"
id: nested
nodes:
  - { id: start, type: trigger }
  - { id: outer, type: loop }
  - { id: inner, type: loop }
  - { id: leaf, type: set }
  - { id: tail, type: set }
  - { id: after, type: debug }
connections:
  - { source: start, target: outer }
  - { source: outer, source_port: body, target: inner }
  - { source: inner, source_port: body, target: leaf }
  - { source: inner, source_port: done, target: tail }
  - { source: outer, source_port: done, target: after }
"#,
        )
        .unwrap();
        let graph = Graph::build(&workflow).unwrap();
        let (main, scopes) = partition_scopes(&NodeRegistry::new(), &graph);

        fn sorted(set: &HashSet<String>) -> Vec<&str> {
            let mut v: Vec<&str> = set.iter().map(String::as_str).collect();
            v.sort();
            v
        }
        assert_eq!(sorted(&main), vec!["after", "outer", "start"]);
        assert_eq!(sorted(&scopes["outer"]), vec!["inner", "tail"]);
        assert_eq!(sorted(&scopes["inner"]), vec!["leaf"]);
    }
}
