//! In-memory storage.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{Execution, Variable, VariableScope};
use super::{ExecutionStore, VariableStore, WorkflowStore};
use crate::error::Result;
use crate::workflow::Workflow;

/// Storage backed by process memory. Cloned records go in and out, so callers
/// never hold a lock across an await.
#[derive(Debug, Default)]
pub struct MemoryStore {
    workflows: RwLock<BTreeMap<String, Workflow>>,
    variables: RwLock<HashMap<(VariableScope, String), Variable>>,
    executions: RwLock<Vec<Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl VariableStore for MemoryStore {
    async fn save_variable(&self, variable: &Variable) -> Result<()> {
        self.variables.write().await.insert(
            (variable.scope.clone(), variable.name.clone()),
            variable.clone(),
        );
        Ok(())
    }

    async fn global_variables(&self) -> Result<Vec<Variable>> {
        Ok(self.scoped(&VariableScope::Global).await)
    }

    async fn workflow_variables(&self, workflow_id: &str) -> Result<Vec<Variable>> {
        Ok(self
            .scoped(&VariableScope::Workflow(workflow_id.to_string()))
            .await)
    }
}

impl MemoryStore {
    async fn scoped(&self, scope: &VariableScope) -> Vec<Variable> {
        let mut vars: Vec<Variable> = self
            .variables
            .read()
            .await
            .values()
            .filter(|v| &v.scope == scope)
            .cloned()
            .collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        vars
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn save_execution(&self, execution: &Execution) -> Result<()> {
        let mut executions = self.executions.write().await;
        match executions.iter_mut().find(|e| e.id == execution.id) {
            Some(existing) => *existing = execution.clone(),
            None => executions.push(execution.clone()),
        }
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list_executions(
        &self,
        workflow_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Execution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| workflow_id.map_or(true, |id| e.workflow_id == id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ExecutionStatus;
    use crate::workflow::{parse_workflow, TriggerType};
    use serde_json::json;

    fn workflow(id: &str) -> Workflow {
        parse_workflow(&format!(
            "id: {}\nname: Test\nnodes:\n  - id: start\n    type: trigger\n",
            id
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_workflow_crud() {
        let store = MemoryStore::new();
        store.save_workflow(&workflow("b")).await.unwrap();
        store.save_workflow(&workflow("a")).await.unwrap();

        let ids: Vec<String> = store
            .list_workflows()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(store.get_workflow("a").await.unwrap().is_some());
        assert!(store.delete_workflow("a").await.unwrap());
        assert!(!store.delete_workflow("a").await.unwrap());
        assert!(store.get_workflow("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_variables_by_scope() {
        let store = MemoryStore::new();
        store
            .save_variable(&Variable::global("region", json!("eu")))
            .await
            .unwrap();
        store
            .save_variable(&Variable::workflow("wf", "region", json!("us")))
            .await
            .unwrap();
        store
            .save_variable(&Variable::global("region", json!("ap")))
            .await
            .unwrap();

        let globals = store.global_variables().await.unwrap();
        assert_eq!(globals.len(), 1);
        assert_eq!(globals[0].value, json!("ap"));

        let scoped = store.workflow_variables("wf").await.unwrap();
        assert_eq!(scoped[0].value, json!("us"));
        assert!(store.workflow_variables("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_execution_replaces_and_lists_newest_first() {
        let store = MemoryStore::new();
        let mut first = Execution::pending("e1", "wf", "Test", TriggerType::Manual, json!({}));
        store.save_execution(&first).await.unwrap();
        let second = Execution::pending("e2", "other", "Other", TriggerType::Manual, json!({}));
        store.save_execution(&second).await.unwrap();

        first.status = ExecutionStatus::Success;
        store.save_execution(&first).await.unwrap();

        let stored = store.get_execution("e1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);

        let all = store.list_executions(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "e2");

        let only_wf = store.list_executions(Some("wf"), 10).await.unwrap();
        assert_eq!(only_wf.len(), 1);
    }
}
