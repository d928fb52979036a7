//! Orchestrator: load a stored record, mark it running, execute, store the outcome.

use std::sync::Arc;

use anyhow::{Context as AnyhowContext, Result, bail};
use tracing::{info, warn};

use crate::agent::{AgentController, AgentRun, LanguageModel};
use crate::browser::Connector;
use crate::compiler::Compiler;
use crate::config::Settings;
use crate::runtime::{ConnectionLeases, RunReport, Runtime};
use crate::store::{RecordStatus, RecordStore};

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    connector: Arc<dyn Connector>,
    compiler: Compiler,
    runtime: Runtime,
    leases: ConnectionLeases,
    settings: Settings,
    model: Option<Arc<dyn LanguageModel>>,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RecordStore>, connector: Arc<dyn Connector>, settings: Settings) -> Self {
        let leases = ConnectionLeases::new();
        let runtime = Runtime::new(connector.clone())
            .with_config(settings.runtime.clone())
            .with_store(store.clone())
            .with_leases(leases.clone());
        Self {
            store,
            connector,
            compiler: Compiler::new(),
            runtime,
            leases,
            settings,
            model: None,
        }
    }

    pub fn with_compiler(mut self, compiler: Compiler) -> Self {
        self.compiler = compiler;
        self
    }

    /// Language model for agent tasks.
    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn run_workflow(&self, id: &str, endpoint: &str) -> Result<RunReport> {
        let workflow = self
            .store
            .load_workflow(id)
            .await
            .with_context(|| format!("Failed to load workflow {}", id))?;
        self.mark(id, RecordStatus::Running).await?;

        let report = match self.compiler.compile(&workflow) {
            Ok(program) => self.runtime.run(endpoint, &program).await,
            Err(e) => {
                warn!(workflow_id = %id, error = %e, "Workflow did not compile");
                RunReport::rejected(&workflow.id, e.into())
            }
        };

        let status = if report.is_completed() {
            RecordStatus::Completed
        } else {
            RecordStatus::Error
        };
        self.mark(id, status).await?;
        Ok(report)
    }

    pub async fn run_task(&self, id: &str, endpoint: &str) -> Result<AgentRun> {
        let Some(model) = self.model.clone() else {
            bail!("No language model configured for agent tasks");
        };
        let task = self
            .store
            .load_task(id)
            .await
            .with_context(|| format!("Failed to load task {}", id))?;
        self.mark(id, RecordStatus::Running).await?;

        let mut agent_config = self.settings.agent.clone();
        agent_config.take_screenshots |= task.take_screenshots;
        let controller = AgentController::new(self.connector.clone(), model)
            .with_config(agent_config)
            .with_leases(self.leases.clone())
            .with_action_timeout(self.settings.runtime.default_timeout_ms);

        let run = controller.run(endpoint, &task.description).await;
        let status = if run.is_completed() {
            RecordStatus::Completed
        } else {
            RecordStatus::Error
        };
        self.mark(id, status).await?;
        Ok(run)
    }

    async fn mark(&self, id: &str, status: RecordStatus) -> Result<()> {
        info!(record_id = %id, status = ?status, "Status");
        self.store
            .save_status(id, status)
            .await
            .with_context(|| format!("Failed to save status of {}", id))
    }
}
