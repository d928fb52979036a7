pub mod context;
pub mod engine;
pub mod lease;
pub mod program;

pub use context::{Context, Input, NodeResult, NodeStatus, Services};
pub use engine::{RunReport, RunState, RunStatus, Runtime, execute_sequence};
pub use lease::{ConnectionLeases, Lease};
pub use program::{CompileWarning, Fragment, Operation, Program};
