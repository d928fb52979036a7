use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One planned unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl AgentStep {
    pub fn pending(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: StepStatus::Pending,
            result: None,
            screenshot: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Planning,
    Executing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrowserState {
    pub url: String,
    pub title: String,
}

/// 代理运行状态，一次运行独占
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub task: String,
    pub steps: Vec<AgentStep>,
    pub current_step: usize,
    pub status: AgentStatus,
    pub browser_state: BrowserState,
    pub memory: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentState {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            steps: Vec::new(),
            current_step: 0,
            status: AgentStatus::Idle,
            browser_state: BrowserState::default(),
            memory: BTreeMap::new(),
            error: None,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = AgentStatus::Error;
        self.error = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, AgentStatus::Completed | AgentStatus::Error)
    }
}
