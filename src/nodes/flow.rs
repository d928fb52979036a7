//! Control flow: `flow-if`, `flow-loop` and marker nodes.
//!
//! Flow nodes own their nested scopes. The scope fragments run inside the
//! flow node's own fragment and never appear in the enclosing sequence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use evalexpr::{
    ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node as EvalNode, build_operator_tree,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{CompiledScopes, Processor, ProcessorRegistry, ScopeSpec, decode, invalid};
use crate::dsl::{Binding, Node};
use crate::error::{ActionError, GraphError};
use crate::runtime::context::{Context, Input};
use crate::runtime::engine::execute_sequence;
use crate::runtime::program::{Fragment, Operation};

pub const IF_SCOPES: &[ScopeSpec] = &[
    ScopeSpec {
        name: "then",
        handles: &["then", "true"],
    },
    ScopeSpec {
        name: "else",
        handles: &["else", "false"],
    },
];

pub const LOOP_SCOPES: &[ScopeSpec] = &[ScopeSpec {
    name: "body",
    handles: &["body", "loop"],
}];

pub fn register(registry: &mut ProcessorRegistry) {
    registry.register("flow-if", Arc::new(IfProcessor));
    registry.register("flow-loop", Arc::new(LoopProcessor));
    registry.register_all(&["start-script", "stop", "note", "annotation"], Arc::new(MarkerProcessor));
}

// --- CONDITIONS ---

/// Expression variable name for a node id: `extract-1` → `extract_1`.
pub fn identifier(node_id: &str) -> String {
    let mut ident: String = node_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

fn to_eval(value: &Value) -> Option<evalexpr::Value> {
    match value {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(evalexpr::Value::Int(i))
            } else {
                n.as_f64().map(evalexpr::Value::Float)
            }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        _ => None,
    }
}

/// A boolean expression over the named outputs.
///
/// Scalar outputs are visible as `<node>`; scalar fields of object outputs as
/// `<node>_<field>`.
#[derive(Debug)]
pub struct Condition {
    raw: String,
    tree: EvalNode,
}

impl Condition {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let clean = unwrap_references(raw)?;
        let tree: EvalNode = build_operator_tree(&clean).map_err(|e| e.to_string())?;
        Ok(Self { raw: clean, tree })
    }

    /// Scalar outputs are bound before object fields; a name already taken
    /// keeps its first value.
    pub fn evaluate(&self, outputs: &BTreeMap<String, Value>) -> Result<bool, ActionError> {
        let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
        let mut owners: HashMap<String, String> = HashMap::new();
        let mut bind = |name: String, source: String, value: evalexpr::Value| {
            if let Some(owner) = owners.get(&name) {
                warn!(variable = %name, kept = %owner, dropped = %source, "Condition variable collision");
                return;
            }
            if let Err(e) = eval_ctx.set_value(name.clone(), value) {
                warn!(variable = %name, "Cannot bind condition variable: {}", e);
                return;
            }
            owners.insert(name, source);
        };

        for (node_id, value) in outputs {
            if let Some(v) = to_eval(value) {
                bind(identifier(node_id), node_id.clone(), v);
            }
        }
        for (node_id, value) in outputs {
            if let Value::Object(fields) = value {
                for (field, v) in fields {
                    if let Some(v) = to_eval(v) {
                        let name = format!("{}_{}", identifier(node_id), identifier(field));
                        bind(name, format!("{}.{}", node_id, field), v);
                    }
                }
            }
        }

        self.tree
            .eval_boolean_with_context(&eval_ctx)
            .map_err(|e| ActionError::Expression(format!("'{}': {}", self.raw, e)))
    }
}

/// Replace each `${name}` outside string literals with the variable for `name`.
fn unwrap_references(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        if quoted {
            out.push(c);
            match c {
                '\\' => out.extend(chars.next()),
                '"' => quoted = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                quoted = true;
                out.push(c);
            }
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => name.push(ch),
                        None => return Err(format!("unclosed reference '${{{}'", name)),
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err("empty reference '${}'".to_string());
                }
                out.push_str(&identifier(&name.replace('.', "_")));
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

fn nested(e: crate::error::NodeExecutionError) -> ActionError {
    ActionError::Nested(Box::new(e))
}

// --- IF NODE ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IfSettings {
    condition: String,
}

struct IfProcessor;

impl Processor for IfProcessor {
    fn scopes(&self) -> &'static [ScopeSpec] {
        IF_SCOPES
    }

    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], mut scopes: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: IfSettings = decode(node, bindings)?;
        let condition = Condition::parse(&s.condition).map_err(|e| invalid(node, e))?;
        Ok(Box::new(IfOp {
            node_id: node.id.clone(),
            condition,
            then_branch: scopes.take("then"),
            else_branch: scopes.take("else"),
        }))
    }
}

#[derive(Debug)]
struct IfOp {
    node_id: String,
    condition: Condition,
    then_branch: Vec<Fragment>,
    else_branch: Vec<Fragment>,
}

#[async_trait]
impl Operation for IfOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let result = self.condition.evaluate(ctx.outputs())?;
        debug!(node_id = %self.node_id, condition = %self.condition.raw, result, "Branch");
        ctx.set_output(&self.node_id, Value::Bool(result));

        let branch = if result { &self.then_branch } else { &self.else_branch };
        execute_sequence(branch, ctx).await.map_err(nested)?;
        Ok(Some(Value::Bool(result)))
    }

    fn scopes(&self) -> Vec<(&'static str, &[Fragment])> {
        vec![("then", &self.then_branch), ("else", &self.else_branch)]
    }
}

// --- LOOP NODE ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct LoopSettings {
    times: Option<u32>,
    /// `while` loop, evaluated before each iteration.
    condition: Option<String>,
    /// `for each` over a list.
    items: Option<Input<Value>>,
    max_iterations: Option<u32>,
}

#[derive(Debug)]
enum LoopMode {
    Times(u32),
    While(Condition),
    Each(Input<Value>),
}

struct LoopProcessor;

impl Processor for LoopProcessor {
    fn scopes(&self) -> &'static [ScopeSpec] {
        LOOP_SCOPES
    }

    fn iterates(&self) -> bool {
        true
    }

    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], mut scopes: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: LoopSettings = decode(node, bindings)?;
        let mode = match (s.times, s.condition, s.items) {
            (Some(n), None, None) => LoopMode::Times(n),
            (None, Some(c), None) => LoopMode::While(Condition::parse(&c).map_err(|e| invalid(node, e))?),
            (None, None, Some(items)) => LoopMode::Each(items),
            _ => {
                return Err(invalid(node, "exactly one of times, condition or items is required"));
            }
        };
        Ok(Box::new(LoopOp {
            node_id: node.id.clone(),
            mode,
            max_iterations: s.max_iterations,
            body: scopes.take("body"),
        }))
    }
}

#[derive(Debug)]
struct LoopOp {
    node_id: String,
    mode: LoopMode,
    max_iterations: Option<u32>,
    body: Vec<Fragment>,
}

impl LoopOp {
    async fn iteration(&self, ctx: &mut Context<'_>, index: u32, item: Option<Value>) -> Result<(), ActionError> {
        let mut state = json!({ "index": index });
        if let Some(item) = item {
            state["item"] = item;
        }
        ctx.set_output(&self.node_id, state);
        execute_sequence(&self.body, ctx).await.map_err(nested)
    }
}

#[async_trait]
impl Operation for LoopOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let limit = self.max_iterations.unwrap_or(ctx.config.max_loop_iterations);
        let mut count: u32 = 0;

        match &self.mode {
            LoopMode::Times(n) => {
                if *n > limit {
                    return Err(ActionError::LoopLimit(limit));
                }
                for i in 0..*n {
                    self.iteration(ctx, i, None).await?;
                    count += 1;
                }
            }
            LoopMode::While(condition) => loop {
                ctx.set_output(&self.node_id, json!({ "index": count }));
                if !condition.evaluate(ctx.outputs())? {
                    break;
                }
                if count >= limit {
                    return Err(ActionError::LoopLimit(limit));
                }
                self.iteration(ctx, count, None).await?;
                count += 1;
            },
            LoopMode::Each(items) => {
                let items = match ctx.resolve(items)? {
                    Value::Array(items) => items,
                    other => {
                        return Err(ActionError::Invalid(format!("loop items is not a list: {}", other)));
                    }
                };
                if items.len() > limit as usize {
                    return Err(ActionError::LoopLimit(limit));
                }
                for item in items {
                    self.iteration(ctx, count, Some(item)).await?;
                    count += 1;
                }
            }
        }

        debug!(node_id = %self.node_id, iterations = count, "Loop finished");
        Ok(Some(json!({ "iterations": count })))
    }

    fn scopes(&self) -> Vec<(&'static str, &[Fragment])> {
        vec![("body", &self.body)]
    }
}

// --- MARKERS ---

/// `start-script`, `stop`, `note`, `annotation`: accepted with any settings, no effect.
struct MarkerProcessor;

impl Processor for MarkerProcessor {
    fn compile(&self, _: &Node, _: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        Ok(Box::new(NoopOp))
    }
}

#[derive(Debug)]
struct NoopOp;

#[async_trait]
impl Operation for NoopOp {
    async fn execute(&self, _ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        Ok(None)
    }
}
