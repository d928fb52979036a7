use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ActionError;
use crate::runtime::context::Context;

/// 可执行操作：processor 编译一个节点的产物
#[async_trait]
pub trait Operation: Send + Sync + fmt::Debug {
    /// Run against the live connection; `Some` becomes the node's named output.
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError>;

    /// Nested fragment lists (flow scopes), empty for plain operations.
    fn scopes(&self) -> Vec<(&'static str, &[Fragment])> {
        Vec::new()
    }
}

/// The executable unit compiled for one node.
#[derive(Debug)]
pub struct Fragment {
    pub node_id: String,
    pub node_type: String,
    pub op: Box<dyn Operation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileWarning {
    UnresolvedType { node_id: String, node_type: String },
    Unreachable { node_id: String },
}

impl fmt::Display for CompileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileWarning::UnresolvedType { node_id, node_type } => {
                write!(f, "node '{}' has unknown type '{}' and was skipped", node_id, node_type)
            }
            CompileWarning::Unreachable { node_id } => {
                write!(f, "node '{}' is not reachable from any start node", node_id)
            }
        }
    }
}

/// Compiled workflow: an ordered fragment list plus its output contract.
#[derive(Debug)]
pub struct Program {
    pub workflow_id: String,
    pub fragments: Vec<Fragment>,
    /// Node ids that publish a named output, in program order.
    pub output_schema: Vec<String>,
    pub warnings: Vec<CompileWarning>,
    /// Nodes skipped because their type did not resolve.
    pub unresolved: Vec<String>,
    pub unreachable: Vec<String>,
}

impl Program {
    /// A degraded program compiled with unknown node types left out.
    pub fn is_degraded(&self) -> bool {
        !self.unresolved.is_empty()
    }

    /// Top-level fragment node ids in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.fragments.iter().map(|f| f.node_id.as_str()).collect()
    }

    /// Indented outline of the program, nested scopes included.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        outline_into(&self.fragments, 0, &mut out);
        out
    }
}

fn outline_into(fragments: &[Fragment], depth: usize, out: &mut String) {
    for fragment in fragments {
        out.push_str(&format!(
            "{}{} ({})\n",
            "  ".repeat(depth),
            fragment.node_id,
            fragment.node_type
        ));
        for (name, scope) in fragment.op.scopes() {
            out.push_str(&format!("{}[{}]\n", "  ".repeat(depth + 1), name));
            outline_into(scope, depth + 2, out);
        }
    }
}
