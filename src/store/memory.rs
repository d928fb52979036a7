use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{RecordStatus, RecordStore, StatusRecord, StoreError, TaskSpec};
use crate::dsl::Workflow;

/// 内存存储 (tests and one-shot CLI runs)
#[derive(Default)]
pub struct InMemoryStore {
    workflows: DashMap<String, Workflow>,
    tasks: DashMap<String, TaskSpec>,
    statuses: DashMap<String, StatusRecord>,
    tables: DashMap<String, Vec<Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn load_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        self.workflows
            .get(id)
            .map(|w| w.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: "workflow",
                id: id.to_string(),
            })
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn load_task(&self, id: &str) -> Result<TaskSpec, StoreError> {
        self.tasks
            .get(id)
            .map(|t| t.value().clone())
            .ok_or_else(|| StoreError::NotFound {
                kind: "task",
                id: id.to_string(),
            })
    }

    async fn save_task(&self, task: &TaskSpec) -> Result<(), StoreError> {
        self.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn save_status(&self, id: &str, status: RecordStatus) -> Result<(), StoreError> {
        self.statuses.insert(id.to_string(), StatusRecord::now(status));
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<Option<StatusRecord>, StoreError> {
        Ok(self.statuses.get(id).map(|s| s.value().clone()))
    }

    async fn read_table(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.value().clone())
            .unwrap_or_default())
    }

    async fn write_table(&self, table: &str, rows: Vec<Value>) -> Result<(), StoreError> {
        self.tables.insert(table.to_string(), rows);
        Ok(())
    }
}
