use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::llm::{ChatMessage, LanguageModel};
use super::planner::{Decision, parse_decision, parse_plan};
use super::prompts::{SYSTEM_PROMPT, action_prompt, planning_prompt};
use super::screenshot::{FileScreenshotSink, ScreenshotSink};
use super::state::{AgentState, AgentStatus, StepStatus};
use crate::browser::{Browser, Connector};
use crate::config::AgentConfig;
use crate::error::{AgentError, CANCELLED, ConnectionError, PlanningError, StepExecutionError};
use crate::runtime::engine::panic_message;
use crate::runtime::lease::ConnectionLeases;
use crate::tools::DEFAULT_TIMEOUT_MS;

/// Outcome of one agent run: the final state plus the coarse terminal error.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub run_id: Uuid,
    pub state: AgentState,
    pub error: Option<AgentError>,
}

impl AgentRun {
    pub fn is_completed(&self) -> bool {
        self.state.status == AgentStatus::Completed
    }
}

/// 智能体控制器：plan → execute → observe, stop at the first failed step
pub struct AgentController {
    connector: Arc<dyn Connector>,
    model: Arc<dyn LanguageModel>,
    leases: ConnectionLeases,
    config: AgentConfig,
    action_timeout_ms: u64,
    screenshots: Option<Arc<dyn ScreenshotSink>>,
    cancel: CancellationToken,
}

impl AgentController {
    pub fn new(connector: Arc<dyn Connector>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            connector,
            model,
            leases: ConnectionLeases::new(),
            config: AgentConfig::default(),
            action_timeout_ms: DEFAULT_TIMEOUT_MS,
            screenshots: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_leases(mut self, leases: ConnectionLeases) -> Self {
        self.leases = leases;
        self
    }

    /// Default timeout for actions that do not name one.
    pub fn with_action_timeout(mut self, timeout_ms: u64) -> Self {
        self.action_timeout_ms = timeout_ms;
        self
    }

    /// Store screenshots here instead of under `screenshot_dir`. Enables capture.
    pub fn with_screenshot_sink(mut self, sink: Arc<dyn ScreenshotSink>) -> Self {
        self.config.take_screenshots = true;
        self.screenshots = Some(sink);
        self
    }

    /// Fires before planning or before the next step; the in-flight step finishes first.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn sink_for(&self, run_id: Uuid) -> Option<Arc<dyn ScreenshotSink>> {
        if !self.config.take_screenshots {
            return None;
        }
        Some(match &self.screenshots {
            Some(sink) => sink.clone(),
            None => Arc::new(FileScreenshotSink::new(&self.config.screenshot_dir, run_id.to_string())),
        })
    }

    pub async fn run(&self, endpoint: &str, task: &str) -> AgentRun {
        let run_id = Uuid::new_v4();
        let mut state = AgentState::new(task);
        info!(run_id = %run_id, endpoint = %endpoint, "Agent run started");

        let finish = |mut state: AgentState, error: AgentError| {
            state.fail(match &error {
                AgentError::Cancelled => CANCELLED.to_string(),
                other => other.to_string(),
            });
            error!(run_id = %run_id, error = %error, "Agent run failed");
            AgentRun {
                run_id,
                state,
                error: Some(error),
            }
        };

        let _lease = match self.leases.acquire(endpoint, &run_id.to_string()) {
            Ok(lease) => lease,
            Err(e) => return finish(state, e.into()),
        };
        let browser = match self.connector.connect(endpoint).await {
            Ok(browser) => browser,
            Err(e) => {
                let err = ConnectionError::Unreachable {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                };
                return finish(state, err.into());
            }
        };

        let sink = self.sink_for(run_id);
        let outcome = AssertUnwindSafe(self.drive(run_id, &mut state, browser.as_ref(), sink.as_deref()))
            .catch_unwind()
            .await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let cause = format!("panicked: {}", panic_message(panic.as_ref()));
                error!(run_id = %run_id, status = ?state.status, "Agent run panicked: {}", cause);
                let index = state.current_step;
                match state.steps.get_mut(index) {
                    Some(step) if state.status == AgentStatus::Executing => {
                        step.status = StepStatus::Failed;
                        step.result = Some(format!("Error: {}", cause));
                        Err(StepExecutionError {
                            step_id: step.id.clone(),
                            cause,
                        }
                        .into())
                    }
                    _ => Err(PlanningError::Model(cause).into()),
                }
            }
        };

        if let Err(e) = browser.close().await {
            warn!(run_id = %run_id, error = %e, "Error while closing connection");
        }

        match result {
            Ok(()) => {
                state.status = AgentStatus::Completed;
                info!(run_id = %run_id, steps = state.steps.len(), "Agent run completed");
                AgentRun {
                    run_id,
                    state,
                    error: None,
                }
            }
            Err(e) => finish(state, e),
        }
    }

    async fn drive(
        &self,
        run_id: Uuid,
        state: &mut AgentState,
        browser: &dyn Browser,
        sink: Option<&dyn ScreenshotSink>,
    ) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        state.status = AgentStatus::Planning;
        debug!(run_id = %run_id, "Planning");
        let plan = self
            .model
            .generate(&[
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(planning_prompt(&state.task)),
            ])
            .await
            .map_err(|e| PlanningError::Model(e.to_string()))?;
        state.steps = parse_plan(&plan, self.config.max_steps)?;
        info!(run_id = %run_id, steps = state.steps.len(), "Plan ready");

        state.status = AgentStatus::Executing;
        for index in 0..state.steps.len() {
            if self.cancel.is_cancelled() {
                warn!(run_id = %run_id, step = index, "Agent run cancelled");
                return Err(AgentError::Cancelled);
            }

            state.current_step = index;
            state.steps[index].status = StepStatus::InProgress;
            self.observe(run_id, state, browser).await;
            debug!(run_id = %run_id, step = index, description = %state.steps[index].description, "Executing step");

            let outcome = self.execute_step(state, index, browser).await;

            if let Some(sink) = sink {
                match capture(browser, sink).await {
                    Ok(path) => state.steps[index].screenshot = Some(path),
                    Err(e) => warn!(run_id = %run_id, step = index, error = %e, "Screenshot failed"),
                }
            }

            let step = &mut state.steps[index];
            match outcome {
                Ok((text, value)) => {
                    step.status = StepStatus::Completed;
                    step.result = Some(text);
                    state.memory.insert(step.id.clone(), value.clone());
                    state.memory.insert("last_result".to_string(), value);
                }
                Err(cause) => {
                    step.status = StepStatus::Failed;
                    step.result = Some(format!("Error: {}", cause));
                    return Err(StepExecutionError {
                        step_id: step.id.clone(),
                        cause,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Refresh url/title; a failure leaves the previous values in place.
    async fn observe(&self, run_id: Uuid, state: &mut AgentState, browser: &dyn Browser) {
        match browser.url().await {
            Ok(url) => state.browser_state.url = url,
            Err(e) => debug!(run_id = %run_id, error = %e, "Could not read url"),
        }
        match browser.title().await {
            Ok(title) => state.browser_state.title = title,
            Err(e) => debug!(run_id = %run_id, error = %e, "Could not read title"),
        }
    }

    /// Ask the model for this step's action and perform it.
    async fn execute_step(
        &self,
        state: &AgentState,
        index: usize,
        browser: &dyn Browser,
    ) -> Result<(String, Value), String> {
        let step = &state.steps[index];
        let reply = self
            .model
            .generate(&[
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user(action_prompt(&step.description, &state.browser_state, &state.memory)),
            ])
            .await
            .map_err(|e| format!("model call failed: {}", e))?;

        match parse_decision(&reply)? {
            Decision::Respond(text) => Ok((text.clone(), Value::String(text))),
            Decision::Act(action) => {
                debug!(step_id = %step.id, action = %action.describe(), "Performing");
                let output = action
                    .perform_within(browser, self.action_timeout_ms)
                    .await
                    .map_err(|e| e.to_string())?;
                let text = output.describe();
                let value = output.into_value().unwrap_or_else(|| Value::String(text.clone()));
                Ok((text, value))
            }
        }
    }
}

async fn capture(browser: &dyn Browser, sink: &dyn ScreenshotSink) -> Result<std::path::PathBuf, String> {
    let bytes = browser.screenshot().await.map_err(|e| e.to_string())?;
    sink.save(&bytes).await.map_err(|e| e.to_string())
}
