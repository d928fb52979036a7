use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{RecordStatus, RecordStore, StatusRecord, StoreError, TaskSpec};
use crate::dsl::Workflow;

/// Redis 存储：JSON 值存放在 `browserflow:*` 键下
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            prefix: "browserflow".to_string(),
        }
    }

    pub fn open(url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(redis::Client::open(url)?))
    }

    /// Namespace keys under a different prefix (tests isolate runs this way).
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_string();
        self
    }

    fn key(&self, kind: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, kind, id)
    }

    async fn get_json<T: DeserializeOwned>(&self, kind: &'static str, id: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(self.key(kind, id)).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    async fn set_json<T: Serialize>(&self, kind: &str, id: &str, value: &T) -> Result<(), StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw = serde_json::to_string(value)?;
        let _: () = conn.set(self.key(kind, id), raw).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn load_workflow(&self, id: &str) -> Result<Workflow, StoreError> {
        self.get_json("workflow", id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "workflow",
                id: id.to_string(),
            })
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.set_json("workflow", &workflow.id, workflow).await
    }

    async fn load_task(&self, id: &str) -> Result<TaskSpec, StoreError> {
        self.get_json("task", id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "task",
                id: id.to_string(),
            })
    }

    async fn save_task(&self, task: &TaskSpec) -> Result<(), StoreError> {
        self.set_json("task", &task.id, task).await
    }

    async fn save_status(&self, id: &str, status: RecordStatus) -> Result<(), StoreError> {
        self.set_json("status", id, &StatusRecord::now(status)).await
    }

    async fn status(&self, id: &str) -> Result<Option<StatusRecord>, StoreError> {
        self.get_json("status", id).await
    }

    async fn read_table(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Vec<String> = conn.lrange(self.key("table", table), 0, -1).await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(StoreError::from))
            .collect()
    }

    async fn write_table(&self, table: &str, rows: Vec<Value>) -> Result<(), StoreError> {
        let key = self.key("table", table);
        let items = rows
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !items.is_empty() {
            pipe.rpush(&key, items).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
