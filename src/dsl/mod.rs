pub mod builder;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type NodeId = String;

/// 原始 DSL 定义的 Workflow (编辑器导出的图)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// DSL 中的节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: NodeId,
    /// 节点类型标签 (e.g. "page-click", "flow-if", "data-extract")
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

/// DSL 中的边
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl Edge {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: format!("{}->{}", source, target),
            source: source.to_string(),
            target: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }

    /// Edge id, falling back to `source->target` for edges loaded without one.
    pub fn label(&self) -> String {
        if self.id.is_empty() {
            format!("{}->{}", self.source, self.target)
        } else {
            self.id.clone()
        }
    }

    /// The setting this edge feeds, if it is a data edge.
    pub fn binding(&self) -> Option<Binding> {
        let handle = self.target_handle.as_deref()?;
        Some(Binding {
            source: self.source.clone(),
            source_handle: self.source_handle.clone(),
            target_handle: handle.to_string(),
        })
    }
}

/// (sourceNodeId, sourceHandle, targetHandle) triple for one inbound data edge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    pub source: NodeId,
    #[serde(default)]
    pub source_handle: Option<String>,
    pub target_handle: String,
}

impl Binding {
    /// Setting key addressed by the target handle; `setting-text` and `text` both mean `text`.
    pub fn setting_key(&self) -> &str {
        self.target_handle
            .strip_prefix("setting-")
            .unwrap_or(&self.target_handle)
    }
}

impl Workflow {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Outbound edges of `id` in declaration order.
    pub fn outbound<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn inbound<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Data bindings that target `id`, in edge declaration order.
    pub fn bindings_for(&self, id: &str) -> Vec<Binding> {
        self.inbound(id).filter_map(Edge::binding).collect()
    }
}
