//! Persistence collaborators.
//!
//! The engine reads workflows and variables and writes execution records
//! through these traits. [`MemoryStore`] implements all of them.

mod memory;
mod models;

pub use memory::MemoryStore;
pub use models::*;

use async_trait::async_trait;

use crate::error::Result;
use crate::workflow::Workflow;

/// Workflow definitions keyed by workflow id.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert or replace a workflow.
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    /// All workflows, ordered by id.
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    /// Returns whether a workflow was removed.
    async fn delete_workflow(&self, id: &str) -> Result<bool>;
}

/// Persisted global and workflow-scoped variables.
#[async_trait]
pub trait VariableStore: Send + Sync {
    /// Insert or replace a variable within its scope.
    async fn save_variable(&self, variable: &Variable) -> Result<()>;

    async fn global_variables(&self) -> Result<Vec<Variable>>;

    async fn workflow_variables(&self, workflow_id: &str) -> Result<Vec<Variable>>;
}

/// Execution audit records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace an execution with its node records.
    async fn save_execution(&self, execution: &Execution) -> Result<()>;

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>>;

    /// Most recent executions first, optionally for one workflow.
    async fn list_executions(&self, workflow_id: Option<&str>, limit: usize)
        -> Result<Vec<Execution>>;
}

/// Everything the engine needs from persistence.
pub trait Storage: WorkflowStore + VariableStore + ExecutionStore {}

impl<T: WorkflowStore + VariableStore + ExecutionStore> Storage for T {}
