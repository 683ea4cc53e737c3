//! Workflow executor.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn, Span};

use super::cancel::CancellationRegistry;
use super::context::ExecutionContext;
use super::recorder::ExecutionRecorder;
use super::scheduler::{Run, RunLimits, Walk};
use crate::config::EngineConfig;
use crate::credentials::{CredentialProvider, CredentialVault, SecretCipher};
use crate::error::{Error, Result};
use crate::expression::Evaluator;
use crate::metrics;
use crate::monitor::ExecutionListener;
use crate::nodes::NodeRegistry;
use crate::storage::{Execution, ExecutionStatus, Storage};
use crate::workflow::{Graph, Workflow};

/// Workflow executor.
///
/// Cheap to clone; clones share the registry, storage, listeners and the
/// set of running executions.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<NodeRegistry>,
    storage: Arc<dyn Storage>,
    listeners: Vec<Arc<dyn ExecutionListener>>,
    vault: Option<Arc<CredentialVault>>,
    config: EngineConfig,
    running: CancellationRegistry,
}

/// A workflow execution running on its own task.
pub struct ExecutionHandle {
    pub execution_id: String,
    handle: JoinHandle<Result<Execution>>,
}

impl ExecutionHandle {
    /// Wait for the execution to finish.
    pub async fn wait(self) -> Result<Execution> {
        self.handle
            .await
            .map_err(|e| Error::Internal(format!("Execution task failed: {}", e)))?
    }
}

impl Executor {
    /// Create a new executor.
    pub fn new(registry: NodeRegistry, storage: Arc<dyn Storage>) -> Self {
        Self {
            registry: Arc::new(registry),
            storage,
            listeners: Vec::new(),
            vault: None,
            config: EngineConfig::default(),
            running: CancellationRegistry::new(),
        }
    }

    /// Attach a listener for execution logs and node state changes.
    pub fn with_listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Credential vault used for node credentials and secret variables.
    pub fn with_credentials(mut self, vault: Arc<CredentialVault>) -> Self {
        self.vault = Some(vault);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Execute a stored workflow and wait for it to finish.
    pub async fn execute(&self, workflow_id: &str, input: Value) -> Result<Execution> {
        let workflow = self.load_workflow(workflow_id).await?;
        self.execute_workflow(&workflow, input).await
    }

    /// Execute a workflow definition and wait for it to finish.
    ///
    /// Execution failures are reported in the returned record. `Err` is
    /// reserved for storage and internal errors.
    pub async fn execute_workflow(&self, workflow: &Workflow, input: Value) -> Result<Execution> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.running.register(&execution_id);
        let result = self.run(workflow, input, &execution_id, cancel).await;
        self.running.unregister(&execution_id);
        result
    }

    /// Start a stored workflow on a background task.
    pub async fn execute_async(&self, workflow_id: &str, input: Value) -> Result<ExecutionHandle> {
        let workflow = self.load_workflow(workflow_id).await?;
        Ok(self.spawn(workflow, input))
    }

    /// Start a workflow definition on a background task. The execution is
    /// cancellable as soon as this returns.
    pub fn spawn(&self, workflow: Workflow, input: Value) -> ExecutionHandle {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.running.register(&execution_id);
        let executor = self.clone();
        let id = execution_id.clone();

        let handle = tokio::spawn(async move {
            let result = executor.run(&workflow, input, &id, cancel).await;
            executor.running.unregister(&id);
            result
        });

        ExecutionHandle {
            execution_id,
            handle,
        }
    }

    /// Request cancellation of a running execution. Returns false if it is
    /// not running.
    pub fn cancel(&self, execution_id: &str) -> bool {
        let found = self.running.cancel(execution_id);
        if found {
            info!("Cancellation requested for execution {}", execution_id);
        }
        found
    }

    /// Cancel every running execution and return how many were signalled.
    pub fn shutdown(&self) -> usize {
        let count = self.running.cancel_all();
        if count > 0 {
            warn!("Shutting down: cancelling {} running executions", count);
        }
        count
    }

    pub fn running_executions(&self) -> Vec<String> {
        self.running.running()
    }

    async fn load_workflow(&self, workflow_id: &str) -> Result<Workflow> {
        self.storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| Error::Workflow(format!("Workflow '{}' not found", workflow_id)))
    }

    #[instrument(
        name = "workflow.execute",
        skip(self, workflow, input, cancel),
        fields(
            workflow_id = %workflow.id,
            workflow_name = %workflow.name,
            trigger_type = %workflow.trigger_type,
            execution_id = tracing::field::Empty,
        )
    )]
    async fn run(
        &self,
        workflow: &Workflow,
        input: Value,
        execution_id: &str,
        cancel: CancellationToken,
    ) -> Result<Execution> {
        Span::current().record("execution_id", execution_id);
        let start_time = Instant::now();
        let trigger_type = workflow.trigger_type.to_string();

        let recorder = ExecutionRecorder::new(
            Execution::pending(
                execution_id,
                &workflow.id,
                workflow.display_name(),
                workflow.trigger_type,
                input.clone(),
            ),
            self.listeners.clone(),
        );

        let graph = match Graph::build(workflow) {
            Ok(graph) => Arc::new(graph),
            Err(e) => {
                warn!("Workflow '{}' failed validation: {}", workflow.id, e);
                let execution = recorder.finish(ExecutionStatus::Failed, None, Some(&e));
                self.storage.save_execution(&execution).await?;
                metrics::record_workflow_execution(&execution.status.to_string(), &trigger_type);
                return Ok(execution);
            }
        };

        let settings = &workflow.settings;
        let limits = RunLimits {
            max_visits: settings
                .max_node_visits
                .unwrap_or(self.config.max_node_visits)
                .max(1),
            timeout_seconds: settings
                .timeout_seconds
                .unwrap_or(self.config.default_timeout_seconds)
                .max(1),
            loop_parallelism: settings
                .loop_parallelism
                .unwrap_or(self.config.loop_parallelism)
                .max(1),
            max_loop_items: self.config.max_loop_items,
        };

        let ctx = self.build_context(workflow, &input).await?;

        info!(
            "Starting execution {} of workflow '{}'",
            execution_id, workflow.name
        );
        recorder.start();
        self.storage.save_execution(&recorder.snapshot()).await?;
        metrics::inc_active_executions();

        let credentials = self
            .vault
            .clone()
            .map(|vault| vault as Arc<dyn CredentialProvider>);
        let run = Arc::new(Run::new(
            self.registry.clone(),
            graph,
            Evaluator::with_max_passes(self.config.max_expression_passes),
            recorder.clone(),
            credentials,
            cancel,
            &workflow.name,
            input,
            limits,
        ));

        let mut walk = Walk::main(run.clone(), ctx);
        let outcome = walk.drive().await;

        let execution = match outcome {
            Ok(()) => recorder.finish(
                ExecutionStatus::Success,
                Some(walk.last_output().clone()),
                None,
            ),
            Err(Error::Cancelled) => {
                recorder.finish(ExecutionStatus::Cancelled, None, Some(&Error::Cancelled))
            }
            Err(e) => recorder.finish(ExecutionStatus::Failed, None, Some(&e)),
        };
        self.storage.save_execution(&execution).await?;

        metrics::dec_active_executions();
        metrics::record_workflow_execution(&execution.status.to_string(), &trigger_type);
        metrics::record_workflow_duration(start_time.elapsed(), &workflow.name);

        info!(
            "Execution {} finished with status {} after {} node visits",
            execution_id,
            execution.status,
            run.visits()
        );
        Ok(execution)
    }

    /// Variables layered lowest to highest: globals, inline workflow
    /// variables, stored workflow variables, object input keys.
    async fn build_context(&self, workflow: &Workflow, input: &Value) -> Result<ExecutionContext> {
        let mut ctx = ExecutionContext::new().with_node_names(&workflow.nodes);
        if let Some(vault) = &self.vault {
            ctx = ctx.with_cipher(vault.clone() as Arc<dyn SecretCipher>);
        }

        ctx.load_variables(&self.storage.global_variables().await?);
        let mut inline: Vec<(&String, &Value)> = workflow.variables.iter().collect();
        inline.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in inline {
            ctx.set_variable(name, value.clone());
        }
        ctx.load_variables(&self.storage.workflow_variables(&workflow.id).await?);
        ctx.apply_input(input);

        Ok(ctx)
    }
}
