//! Structural checks on a workflow graph. Pure: no compilation, no I/O.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::dsl::{Edge, Workflow};
use crate::error::GraphError;
use crate::nodes::ProcessorRegistry;

/// What to do with node types the registry cannot resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Fail validation with [`GraphError::UnregisteredType`].
    Strict,
    /// Keep going; the node is reported and compiled as nothing.
    #[default]
    Permissive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedNode {
    pub node_id: String,
    pub node_type: String,
}

/// A workflow that passed validation, plus what the compiler needs to know about it.
#[derive(Debug)]
pub struct ValidatedGraph<'a> {
    pub workflow: &'a Workflow,
    /// Nodes without a forward inbound edge, in declaration order.
    pub start_nodes: Vec<&'a str>,
    pub unresolved: Vec<UnresolvedNode>,
    /// Indices into `workflow.edges` of loop re-entry edges.
    pub reentry: BTreeSet<usize>,
}

impl<'a> ValidatedGraph<'a> {
    pub fn is_reentry(&self, index: usize) -> bool {
        self.reentry.contains(&index)
    }

    /// Outbound edges of `id` in declaration order, re-entry edges excluded.
    pub fn forward_edges(&self, id: &'a str) -> impl Iterator<Item = &'a Edge> + '_ {
        self.workflow
            .edges
            .iter()
            .enumerate()
            .filter(move |(i, e)| e.source == id && !self.is_reentry(*i))
            .map(|(_, e)| e)
    }

    /// Every node reachable from `from` along forward edges without passing through `stop`.
    pub fn reach(&self, from: &[&'a str], stop: &str) -> BTreeSet<&'a str> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&'a str> = from.iter().copied().filter(|id| *id != stop).collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            for edge in self.forward_edges(id) {
                if edge.target != stop {
                    queue.push_back(edge.target.as_str());
                }
            }
        }
        seen
    }
}

pub fn validate<'a>(
    workflow: &'a Workflow,
    registry: &ProcessorRegistry,
    policy: UnresolvedPolicy,
) -> Result<ValidatedGraph<'a>, GraphError> {
    // 1. Ids
    let mut ids: HashSet<&str> = HashSet::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(GraphError::EmptyNodeId);
        }
        if !ids.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNode(node.id.clone()));
        }
    }

    // 2. Edge endpoints
    for edge in &workflow.edges {
        for end in [&edge.source, &edge.target] {
            if !ids.contains(end.as_str()) {
                return Err(GraphError::DanglingEdge {
                    edge_id: edge.label(),
                    node_id: end.clone(),
                });
            }
        }
    }

    // 3. Types
    let mut unresolved = Vec::new();
    for node in &workflow.nodes {
        if registry.contains(&node.kind) {
            continue;
        }
        match policy {
            UnresolvedPolicy::Strict => {
                return Err(GraphError::UnregisteredType {
                    node_id: node.id.clone(),
                    node_type: node.kind.clone(),
                });
            }
            UnresolvedPolicy::Permissive => {
                debug!(node_id = %node.id, node_type = %node.kind, "Unregistered node type");
                unresolved.push(UnresolvedNode {
                    node_id: node.id.clone(),
                    node_type: node.kind.clone(),
                });
            }
        }
    }

    // 4. Self-loops and loop re-entry
    let mut graph = ValidatedGraph {
        workflow,
        start_nodes: Vec::new(),
        unresolved,
        reentry: BTreeSet::new(),
    };
    for (i, edge) in workflow.edges.iter().enumerate() {
        if edge.source != edge.target {
            continue;
        }
        let iterates = workflow
            .node(&edge.source)
            .and_then(|n| registry.resolve(&n.kind))
            .is_some_and(|p| p.iterates());
        if !iterates {
            return Err(GraphError::SelfLoop {
                edge_id: edge.label(),
                node_id: edge.source.clone(),
            });
        }
        graph.reentry.insert(i);
    }
    let reentry = reentry_edges(&graph, registry);
    graph.reentry.extend(reentry);

    // 5. Start nodes
    let mut has_inbound: HashSet<&str> = HashSet::new();
    for (i, edge) in workflow.edges.iter().enumerate() {
        if !graph.is_reentry(i) {
            has_inbound.insert(edge.target.as_str());
        }
    }
    graph.start_nodes = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !has_inbound.contains(id))
        .collect();
    if graph.start_nodes.is_empty() {
        return Err(GraphError::NoStartNode);
    }

    // 6. Cycles
    detect_cycle(&graph)?;

    Ok(graph)
}

/// Edges from a loop's body back to the loop node.
fn reentry_edges(graph: &ValidatedGraph<'_>, registry: &ProcessorRegistry) -> Vec<usize> {
    let workflow = graph.workflow;
    let mut found = Vec::new();
    for node in &workflow.nodes {
        let Some(processor) = registry.resolve(&node.kind) else {
            continue;
        };
        if !processor.iterates() {
            continue;
        }
        let scopes = processor.scopes();
        let (entries, continuation): (Vec<&Edge>, Vec<&Edge>) = workflow
            .outbound(&node.id)
            .filter(|e| e.target != node.id)
            .partition(|e| scopes.iter().any(|s| s.accepts(e.source_handle.as_deref())));
        let entries: Vec<&str> = entries.iter().map(|e| e.target.as_str()).collect();
        let continuation: Vec<&str> = continuation
            .iter()
            .filter(|e| e.target_handle.is_none())
            .map(|e| e.target.as_str())
            .collect();
        // Nodes the loop also reaches after it finishes are not part of the body.
        let after = graph.reach(&continuation, &node.id);
        let body: BTreeSet<&str> = graph
            .reach(&entries, &node.id)
            .into_iter()
            .filter(|id| !after.contains(id))
            .collect();
        for (i, edge) in workflow.edges.iter().enumerate() {
            if edge.target == node.id && body.contains(edge.source.as_str()) {
                found.push(i);
            }
        }
    }
    found
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Active,
    Done,
}

fn detect_cycle(graph: &ValidatedGraph<'_>) -> Result<(), GraphError> {
    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut stack: Vec<&str> = Vec::new();
    for node in &graph.workflow.nodes {
        visit(graph, &node.id, &mut marks, &mut stack)?;
    }
    Ok(())
}

fn visit<'a>(
    graph: &ValidatedGraph<'a>,
    id: &'a str,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Result<(), GraphError> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Active) => {
            let from = stack.iter().position(|n| *n == id).unwrap_or(0);
            let mut path: Vec<String> = stack[from..].iter().map(|s| s.to_string()).collect();
            path.push(id.to_string());
            return Err(GraphError::Cycle { path });
        }
        None => {}
    }

    marks.insert(id, Mark::Active);
    stack.push(id);
    for edge in graph.forward_edges(id) {
        visit(graph, &edge.target, marks, stack)?;
    }
    stack.pop();
    marks.insert(id, Mark::Done);
    Ok(())
}
