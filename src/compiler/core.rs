use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info, warn};

use crate::compiler::validator::{UnresolvedPolicy, ValidatedGraph, validate};
use crate::dsl::Workflow;
use crate::error::GraphError;
use crate::nodes::{CompiledScopes, ProcessorRegistry};
use crate::runtime::program::{CompileWarning, Fragment, Program};

/// 脚本编译器：Workflow → Program
///
/// Depth-first from every start node in declaration order. Each node compiles
/// exactly once; flow nodes swallow the nodes of their own scopes.
pub struct Compiler {
    registry: ProcessorRegistry,
    policy: UnresolvedPolicy,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            registry: ProcessorRegistry::standard(),
            policy: UnresolvedPolicy::default(),
        }
    }

    pub fn with_registry(mut self, registry: ProcessorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn compile(&self, workflow: &Workflow) -> Result<Program, GraphError> {
        let graph = validate(workflow, &self.registry, self.policy)?;

        let mut session = Session {
            graph: &graph,
            registry: &self.registry,
            visited: HashSet::new(),
            held: Vec::new(),
            warnings: Vec::new(),
            output_schema: Vec::new(),
        };

        let mut fragments = Vec::new();
        for start in &graph.start_nodes {
            session.visit(*start, &mut fragments)?;
        }

        let mut unreachable = Vec::new();
        for node in &workflow.nodes {
            if !session.visited.contains(node.id.as_str()) {
                unreachable.push(node.id.clone());
                session.warnings.push(CompileWarning::Unreachable {
                    node_id: node.id.clone(),
                });
            }
        }

        for warning in &session.warnings {
            warn!(workflow_id = %workflow.id, "{}", warning);
        }

        let program = Program {
            workflow_id: workflow.id.clone(),
            fragments,
            output_schema: session.output_schema,
            warnings: session.warnings,
            unresolved: graph.unresolved.iter().map(|u| u.node_id.clone()).collect(),
            unreachable,
        };
        info!(
            workflow_id = %program.workflow_id,
            fragments = program.fragments.len(),
            degraded = program.is_degraded(),
            "Compiled workflow"
        );
        Ok(program)
    }
}

struct Session<'g, 'a> {
    graph: &'g ValidatedGraph<'a>,
    registry: &'g ProcessorRegistry,
    visited: HashSet<&'a str>,
    /// Rejoin and bypassed nodes of the flow nodes being compiled; scopes stop at them.
    held: Vec<BTreeSet<&'a str>>,
    warnings: Vec<CompileWarning>,
    output_schema: Vec<String>,
}

impl<'g, 'a> Session<'g, 'a> {
    fn is_held(&self, id: &str) -> bool {
        self.held.iter().any(|set| set.contains(id))
    }

    fn visit(&mut self, id: &'a str, out: &mut Vec<Fragment>) -> Result<(), GraphError> {
        if self.is_held(id) || !self.visited.insert(id) {
            return Ok(());
        }
        let Some(node) = self.graph.workflow.node(id) else {
            return Ok(());
        };

        let Some(processor) = self.registry.resolve(&node.kind) else {
            self.warnings.push(CompileWarning::UnresolvedType {
                node_id: node.id.clone(),
                node_type: node.kind.clone(),
            });
            return self.follow(id, out);
        };

        let bindings = self.graph.workflow.bindings_for(id);
        let specs = processor.scopes();

        if specs.is_empty() {
            let op = processor.compile(node, &bindings, CompiledScopes::default())?;
            self.push(out, node.id.clone(), node.kind.clone(), op, processor.produces_output());
            return self.follow(id, out);
        }

        // Partition outbound edges into scope entries and continuation.
        let mut entries: Vec<(&'static str, Vec<&'a str>)> = specs.iter().map(|s| (s.name, Vec::new())).collect();
        let mut continuation: Vec<&'a str> = Vec::new();
        let mut data_only: Vec<&'a str> = Vec::new();
        for edge in self.graph.forward_edges(id) {
            let handle = edge.source_handle.as_deref();
            match specs.iter().position(|s| s.accepts(handle)) {
                Some(i) => entries[i].1.push(edge.target.as_str()),
                None if edge.target_handle.is_some() => data_only.push(edge.target.as_str()),
                None => continuation.push(edge.target.as_str()),
            }
        }
        // A data edge into a scope (e.g. the loop item) is not a continuation.
        let scoped: Vec<&'a str> = entries.iter().flat_map(|(_, t)| t.iter().copied()).collect();
        let scoped = self.graph.reach(&scoped, id);
        continuation.extend(data_only.into_iter().filter(|t| !scoped.contains(t)));

        let mut rejoin = self.rejoin_nodes(id, &entries, &continuation);
        rejoin.extend(self.bypassed_nodes(id, &entries));
        debug!(node_id = %id, rejoin = ?rejoin, "Compiling scopes");

        self.held.push(rejoin.clone());
        let mut scopes = CompiledScopes::default();
        let mut result = Ok(());
        for (name, targets) in &entries {
            let mut scope = Vec::new();
            for target in targets {
                result = self.visit(*target, &mut scope);
                if result.is_err() {
                    break;
                }
            }
            if result.is_err() {
                break;
            }
            scopes.insert(*name, scope);
        }
        self.held.pop();
        result?;

        let op = processor.compile(node, &bindings, scopes)?;
        self.push(out, node.id.clone(), node.kind.clone(), op, processor.produces_output());

        // Rejoin frontier first, then the continuation edges.
        for target in self.frontier(&rejoin) {
            self.visit(target, out)?;
        }
        for target in continuation {
            self.visit(target, out)?;
        }
        Ok(())
    }

    fn follow(&mut self, id: &'a str, out: &mut Vec<Fragment>) -> Result<(), GraphError> {
        let targets: Vec<&'a str> = self.graph.forward_edges(id).map(|e| e.target.as_str()).collect();
        for target in targets {
            self.visit(target, out)?;
        }
        Ok(())
    }

    fn push(
        &mut self,
        out: &mut Vec<Fragment>,
        node_id: String,
        node_type: String,
        op: Box<dyn crate::runtime::program::Operation>,
        produces_output: bool,
    ) {
        debug!(node_id = %node_id, node_type = %node_type, "Compiled node");
        if produces_output {
            self.output_schema.push(node_id.clone());
        }
        out.push(Fragment { node_id, node_type, op });
    }

    /// Nodes reachable from more than one scope, or from a scope and the continuation.
    fn rejoin_nodes(
        &self,
        flow_id: &str,
        entries: &[(&'static str, Vec<&'a str>)],
        continuation: &[&'a str],
    ) -> BTreeSet<&'a str> {
        let mut regions: Vec<BTreeSet<&'a str>> = entries
            .iter()
            .map(|(_, targets)| self.graph.reach(targets, flow_id))
            .collect();
        regions.push(self.graph.reach(continuation, flow_id));

        let mut rejoin = BTreeSet::new();
        for (i, region) in regions.iter().enumerate() {
            for id in region {
                if regions[i + 1..].iter().any(|other| other.contains(id)) {
                    rejoin.insert(*id);
                }
            }
        }
        rejoin
    }

    /// Scope nodes that a path around the flow node also reaches, with everything below them.
    /// They run unconditionally, so they belong to the enclosing sequence.
    fn bypassed_nodes(&self, flow_id: &str, entries: &[(&'static str, Vec<&'a str>)]) -> BTreeSet<&'a str> {
        let workflow = self.graph.workflow;
        let mut bypassed = BTreeSet::new();
        for (_, targets) in entries {
            let region = self.graph.reach(targets, flow_id);
            let roots: Vec<&'a str> = region
                .iter()
                .copied()
                .filter(|id| {
                    workflow.edges.iter().enumerate().any(|(i, e)| {
                        e.target == *id
                            && !self.graph.is_reentry(i)
                            && e.source != flow_id
                            && !region.contains(e.source.as_str())
                    })
                })
                .collect();
            bypassed.extend(self.graph.reach(&roots, flow_id));
        }
        bypassed
    }

    /// Rejoin nodes without an inbound edge from another rejoin node, in declaration order.
    fn frontier(&self, rejoin: &BTreeSet<&'a str>) -> Vec<&'a str> {
        let workflow = self.graph.workflow;
        workflow
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| rejoin.contains(id))
            .filter(|id| {
                !workflow
                    .edges
                    .iter()
                    .enumerate()
                    .any(|(i, e)| e.target == *id && !self.graph.is_reentry(i) && rejoin.contains(e.source.as_str()))
            })
            .collect()
    }
}
