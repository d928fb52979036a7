use crate::dsl::{Edge, Node, Workflow};
use serde_json::{Map, Value};

pub struct WorkflowBuilder {
    id: String,
    name: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl WorkflowBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// 添加节点，返回设置构建器
    pub fn node(self, id: &str, kind: &str) -> NodeBuilder {
        NodeBuilder {
            workflow_builder: self,
            id: id.to_string(),
            kind: kind.to_string(),
            settings: Map::new(),
        }
    }

    /// Node without settings.
    pub fn bare(mut self, id: &str, kind: &str) -> Self {
        self.nodes.push(Node {
            id: id.to_string(),
            kind: kind.to_string(),
            settings: Map::new(),
        });
        self
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.edges.push(Edge::new(source, target));
        self
    }

    /// Edge leaving a named source handle ("then", "else", "body", ...).
    pub fn connect_handle(mut self, source: &str, handle: &str, target: &str) -> Self {
        let mut edge = Edge::new(source, target);
        edge.id = format!("{}:{}->{}", source, handle, target);
        edge.source_handle = Some(handle.to_string());
        self.edges.push(edge);
        self
    }

    /// Data edge feeding `setting` of `target` from the output of `source`.
    pub fn bind(mut self, source: &str, source_handle: Option<&str>, target: &str, setting: &str) -> Self {
        let mut edge = Edge::new(source, target);
        edge.id = format!("{}->{}:{}", source, target, setting);
        edge.source_handle = source_handle.map(str::to_string);
        edge.target_handle = Some(format!("setting-{}", setting));
        self.edges.push(edge);
        self
    }

    pub fn build(self) -> Workflow {
        Workflow {
            id: self.id,
            name: self.name,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

pub struct NodeBuilder {
    workflow_builder: WorkflowBuilder,
    id: String,
    kind: String,
    settings: Map<String, Value>,
}

impl NodeBuilder {
    pub fn setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.settings.insert(key.to_string(), value.into());
        self
    }

    pub fn build(mut self) -> WorkflowBuilder {
        self.workflow_builder.nodes.push(Node {
            id: self.id,
            kind: self.kind,
            settings: self.settings,
        });
        self.workflow_builder
    }
}
