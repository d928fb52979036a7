use thiserror::Error;

use crate::browser::BrowserError;

/// 图结构错误：运行永远不会开始
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node ID: {0}")]
    DuplicateNode(String),

    #[error("Node with empty id")]
    EmptyNodeId,

    #[error("Edge '{edge_id}' references missing node '{node_id}'")]
    DanglingEdge { edge_id: String, node_id: String },

    #[error("Edge '{edge_id}' loops node '{node_id}' onto itself, only flow-loop nodes may re-enter")]
    SelfLoop { edge_id: String, node_id: String },

    #[error("Graph has no start node (every node has an inbound edge)")]
    NoStartNode,

    #[error("Cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Node '{node_id}' has an unregistered type '{node_type}'")]
    UnregisteredType { node_id: String, node_type: String },

    #[error("Invalid settings for node '{node_id}' ({node_type}): {message}")]
    InvalidSettings {
        node_id: String,
        node_type: String,
        message: String,
    },

    #[error("Program for '{workflow_id}' contains unresolved node types: {}", nodes.join(", "))]
    Unresolved {
        workflow_id: String,
        nodes: Vec<String>,
    },
}

/// Could not obtain (or keep) the remote browser connection.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Could not connect to {endpoint}: {message}")]
    Unreachable { endpoint: String, message: String },

    #[error("Endpoint {endpoint} is already held by run {holder}")]
    InUse { endpoint: String, holder: String },
}

/// Failure of a single action against the browser or another collaborator.
#[derive(Error, Debug, Clone)]
pub enum ActionError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Timed out after {timeout_ms}ms: {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Output of node '{0}' is not available")]
    MissingOutput(String),

    #[error("Bound value from '{source_node}' has the wrong shape: {message}")]
    BindingType { source_node: String, message: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("{0}")]
    Invalid(String),

    #[error("Loop exceeded {0} iterations")]
    LoopLimit(u32),

    /// A fragment inside a flow scope failed; the inner node is the one to report.
    #[error(transparent)]
    Nested(Box<NodeExecutionError>),
}

#[derive(Error, Debug, Clone)]
#[error("Node '{node_id}' ({node_type}) failed: {cause}")]
pub struct NodeExecutionError {
    pub node_id: String,
    pub node_type: String,
    pub cause: ActionError,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Step '{step_id}' failed: {cause}")]
pub struct StepExecutionError {
    pub step_id: String,
    pub cause: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningError {
    #[error("Planning call failed: {0}")]
    Model(String),

    #[error("Planning response was empty")]
    Empty,
}

/// Terminal error of a compiled-graph run.
#[derive(Error, Debug, Clone)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] GraphError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Node(#[from] NodeExecutionError),
}

impl RunError {
    /// Id of the node that failed, if the run got that far.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunError::Node(e) => Some(&e.node_id),
            _ => None,
        }
    }
}

/// Reason recorded when an agent run is cancelled.
pub const CANCELLED: &str = "cancelled";

/// Terminal error of an agent run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Step(#[from] StepExecutionError),

    #[error("Agent run cancelled")]
    Cancelled,
}
