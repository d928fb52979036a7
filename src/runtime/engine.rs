use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::Connector;
use crate::config::RuntimeConfig;
use crate::error::{ActionError, ConnectionError, GraphError, NodeExecutionError, RunError};
use crate::runtime::context::{Context, NodeResult, NodeStatus, Services};
use crate::runtime::lease::ConnectionLeases;
use crate::runtime::program::{Fragment, Program};
use crate::store::{InMemoryStore, RecordStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Disconnected,
    Connecting,
    Connected,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Everything a caller learns about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub status: RunStatus,
    /// Every state the run passed through, in order.
    pub trace: Vec<RunState>,
    pub node_results: Vec<NodeResult>,
    pub outputs: BTreeMap<String, Value>,
    #[serde(serialize_with = "display_error")]
    pub error: Option<RunError>,
}

fn display_error<S: Serializer>(error: &Option<RunError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_some(&e.to_string()),
        None => s.serialize_none(),
    }
}

impl RunReport {
    /// Report for a run that never got past validation or connection.
    pub fn rejected(workflow_id: &str, error: RunError) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow_id: workflow_id.to_string(),
            status: RunStatus::Failed,
            trace: vec![RunState::Disconnected],
            node_results: Vec::new(),
            outputs: BTreeMap::new(),
            error: Some(error),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Id of the failing node, if the run failed inside one.
    pub fn failed_node(&self) -> Option<&str> {
        self.error.as_ref().and_then(RunError::node_id)
    }
}

struct Trace {
    states: Vec<RunState>,
    run_id: Uuid,
}

impl Trace {
    fn new(run_id: Uuid) -> Self {
        Self {
            states: vec![RunState::Disconnected],
            run_id,
        }
    }

    fn enter(&mut self, state: RunState) {
        debug!(run_id = %self.run_id, state = ?state, "Run state");
        self.states.push(state);
    }
}

/// 执行引擎：一个连接，一个程序，严格顺序执行
pub struct Runtime {
    connector: Arc<dyn Connector>,
    leases: ConnectionLeases,
    services: Services,
    config: RuntimeConfig,
}

impl Runtime {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            leases: ConnectionLeases::new(),
            services: Services {
                http: reqwest::Client::new(),
                store: Arc::new(InMemoryStore::new()),
            },
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.services.store = store;
        self
    }

    /// Share endpoint leases with another runtime or agent controller.
    pub fn with_leases(mut self, leases: ConnectionLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn leases(&self) -> &ConnectionLeases {
        &self.leases
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub async fn run(&self, endpoint: &str, program: &Program) -> RunReport {
        let run_id = Uuid::new_v4();
        let mut trace = Trace::new(run_id);
        let fail = |trace: Trace, error: RunError| RunReport {
            run_id,
            workflow_id: program.workflow_id.clone(),
            status: RunStatus::Failed,
            trace: trace.states,
            node_results: Vec::new(),
            outputs: BTreeMap::new(),
            error: Some(error),
        };

        if program.is_degraded() && !self.config.allow_unresolved_types {
            let err = GraphError::Unresolved {
                workflow_id: program.workflow_id.clone(),
                nodes: program.unresolved.clone(),
            };
            warn!(run_id = %run_id, error = %err, "Refusing to run degraded program");
            return fail(trace, err.into());
        }

        let _lease = match self.leases.acquire(endpoint, &run_id.to_string()) {
            Ok(lease) => lease,
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Endpoint unavailable");
                return fail(trace, e.into());
            }
        };

        trace.enter(RunState::Connecting);
        let browser = match self.connector.connect(endpoint).await {
            Ok(browser) => browser,
            Err(e) => {
                error!(run_id = %run_id, endpoint = %endpoint, error = %e, "Could not connect");
                trace.enter(RunState::Disconnected);
                let err = ConnectionError::Unreachable {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                };
                return fail(trace, err.into());
            }
        };
        trace.enter(RunState::Connected);

        info!(run_id = %run_id, workflow_id = %program.workflow_id, fragments = program.fragments.len(), "Run started");
        trace.enter(RunState::Running);

        let mut ctx = Context::new(run_id, browser.as_ref(), &self.services, &self.config);
        let outcome = AssertUnwindSafe(execute_sequence(&program.fragments, &mut ctx))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(run_id = %run_id, node_id = ?ctx.current_node(), "Node panicked: {}", message);
                let node_id = ctx.current_node().unwrap_or_default().to_string();
                let node_type = find_type(&program.fragments, &node_id).unwrap_or_default();
                Err(NodeExecutionError {
                    node_id,
                    node_type,
                    cause: ActionError::Invalid(format!("panicked: {}", message)),
                })
            }
        };
        let (outputs, node_results) = ctx.finish();

        let (status, error) = match result {
            Ok(()) => {
                trace.enter(RunState::Completed);
                info!(run_id = %run_id, "Run completed");
                (RunStatus::Completed, None)
            }
            Err(e) => {
                trace.enter(RunState::Failed);
                error!(run_id = %run_id, node_id = %e.node_id, error = %e.cause, "Run failed");
                (RunStatus::Failed, Some(RunError::Node(e)))
            }
        };

        if let Err(e) = browser.close().await {
            warn!(run_id = %run_id, error = %e, "Error while closing connection");
        }
        trace.enter(RunState::Disconnected);

        RunReport {
            run_id,
            workflow_id: program.workflow_id.clone(),
            status,
            trace: trace.states,
            node_results,
            outputs,
            error,
        }
    }
}

/// Run `fragments` in order, stopping at the first failure.
///
/// Flow operations call this for their nested scopes and wrap the error in
/// [`ActionError::Nested`].
pub async fn execute_sequence(fragments: &[Fragment], ctx: &mut Context<'_>) -> Result<(), NodeExecutionError> {
    for fragment in fragments {
        execute_fragment(fragment, ctx).await?;
    }
    Ok(())
}

async fn execute_fragment(fragment: &Fragment, ctx: &mut Context<'_>) -> Result<(), NodeExecutionError> {
    ctx.enter(&fragment.node_id);
    debug!(run_id = %ctx.run_id, node_id = %fragment.node_id, node_type = %fragment.node_type, "Executing node");

    match fragment.op.execute(ctx).await {
        Ok(output) => {
            if let Some(value) = &output {
                ctx.set_output(&fragment.node_id, value.clone());
            }
            ctx.record(NodeResult {
                node_id: fragment.node_id.clone(),
                node_type: fragment.node_type.clone(),
                status: NodeStatus::Succeeded,
                output,
                error: None,
            });
            Ok(())
        }
        Err(cause) => {
            ctx.record(NodeResult {
                node_id: fragment.node_id.clone(),
                node_type: fragment.node_type.clone(),
                status: NodeStatus::Failed,
                output: None,
                error: Some(cause.to_string()),
            });
            match cause {
                ActionError::Nested(inner) => Err(*inner),
                cause => Err(NodeExecutionError {
                    node_id: fragment.node_id.clone(),
                    node_type: fragment.node_type.clone(),
                    cause,
                }),
            }
        }
    }
}

fn find_type(fragments: &[Fragment], node_id: &str) -> Option<String> {
    fragments.iter().find_map(|f| {
        if f.node_id == node_id {
            return Some(f.node_type.clone());
        }
        f.op.scopes()
            .into_iter()
            .find_map(|(_, scope)| find_type(scope, node_id))
    })
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
