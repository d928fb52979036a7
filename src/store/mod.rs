//! Persistence collaborator.
//!
//! Workflows and agent tasks are opaque records owned by the surrounding
//! application; the core only loads them and reports status back.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dsl::Workflow;

pub use memory::InMemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Malformed record: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

impl From<::redis::RedisError> for StoreError {
    fn from(e: ::redis::RedisError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// A free-text task for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub take_screenshots: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Idle,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: RecordStatus,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    pub fn now(status: RecordStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_workflow(&self, id: &str) -> Result<Workflow, StoreError>;
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;

    async fn load_task(&self, id: &str) -> Result<TaskSpec, StoreError>;
    async fn save_task(&self, task: &TaskSpec) -> Result<(), StoreError>;

    async fn save_status(&self, id: &str, status: RecordStatus) -> Result<(), StoreError>;
    async fn status(&self, id: &str) -> Result<Option<StatusRecord>, StoreError>;

    /// Rows of a data table, in insertion order. Unknown tables are empty.
    async fn read_table(&self, table: &str) -> Result<Vec<Value>, StoreError>;
    /// Replace the rows of a data table.
    async fn write_table(&self, table: &str, rows: Vec<Value>) -> Result<(), StoreError>;
}
