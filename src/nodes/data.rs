//! Extraction, data tables and arithmetic nodes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{CompiledScopes, Processor, ProcessorRegistry, decode, invalid};
use crate::dsl::{Binding, Node};
use crate::error::{ActionError, GraphError};
use crate::runtime::context::{Context, Input};
use crate::runtime::program::Operation;
use crate::tools::Action;

pub fn register(registry: &mut ProcessorRegistry) {
    registry.register("data-extract", Arc::new(ExtractProcessor));
    registry.register_all(&["read-table", "table-read"], Arc::new(ReadTableProcessor));
    registry.register_all(&["write-table", "table-write"], Arc::new(WriteTableProcessor));
    for (node_type, op) in [
        ("math-add", MathOp::Add),
        ("math-subtract", MathOp::Subtract),
        ("math-multiply", MathOp::Multiply),
        ("math-divide", MathOp::Divide),
    ] {
        registry.register(node_type, Arc::new(MathProcessor(op)));
    }
}

// --- EXTRACT ---

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum DataType {
    #[default]
    Text,
    Html,
    Attribute,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ExtractSettings {
    selector: Input<String>,
    #[serde(default)]
    data_type: DataType,
    attribute: Option<String>,
    /// Publish every match as an array instead of the first match.
    #[serde(default)]
    multiple: bool,
    timeout: Option<u64>,
}

struct ExtractProcessor;

impl Processor for ExtractProcessor {
    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ExtractSettings = decode(node, bindings)?;
        let attribute = match (s.data_type, s.attribute) {
            (DataType::Attribute, Some(name)) if !name.is_empty() => Some(name),
            (DataType::Attribute, _) => {
                return Err(invalid(node, "dataType 'attribute' requires an attribute name"));
            }
            _ => None,
        };
        Ok(Box::new(ExtractOp {
            selector: s.selector,
            attribute,
            html: matches!(s.data_type, DataType::Html),
            all: s.multiple,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct ExtractOp {
    selector: Input<String>,
    attribute: Option<String>,
    html: bool,
    all: bool,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Operation for ExtractOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let action = Action::Extract {
            selector: ctx.resolve(&self.selector)?,
            attribute: self.attribute.clone(),
            html: self.html,
            all: self.all,
            timeout_ms: self.timeout_ms,
        };
        let value = ctx.perform(&action).await?.into_value().unwrap_or(Value::Null);
        debug!(run_id = %ctx.run_id, "Extracted {}", value);
        Ok(Some(value))
    }
}

// --- TABLES ---

fn ten() -> usize {
    10
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ReadTableSettings {
    table_id: Input<String>,
    #[serde(default = "ten")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

struct ReadTableProcessor;

impl Processor for ReadTableProcessor {
    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ReadTableSettings = decode(node, bindings)?;
        Ok(Box::new(ReadTableOp {
            table_id: s.table_id,
            limit: s.limit,
            offset: s.offset,
        }))
    }
}

#[derive(Debug)]
struct ReadTableOp {
    table_id: Input<String>,
    limit: usize,
    offset: usize,
}

#[async_trait]
impl Operation for ReadTableOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let table = ctx.resolve(&self.table_id)?;
        let rows = ctx
            .services
            .store
            .read_table(&table)
            .await
            .map_err(|e| ActionError::Store(e.to_string()))?;
        let page: Vec<Value> = rows.into_iter().skip(self.offset).take(self.limit).collect();
        debug!(table = %table, rows = page.len(), "Read table");
        Ok(Some(Value::Array(page)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct WriteTableSettings {
    table_id: Input<String>,
    data: Input<Value>,
}

struct WriteTableProcessor;

impl Processor for WriteTableProcessor {
    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: WriteTableSettings = decode(node, bindings)?;
        if let Input::Literal(data) = &s.data {
            rows_of(data).map_err(|e| invalid(node, e.to_string()))?;
        }
        Ok(Box::new(WriteTableOp {
            table_id: s.table_id,
            data: s.data,
        }))
    }
}

/// Rows from an array, or from a string holding a JSON array.
fn rows_of(data: &Value) -> Result<Vec<Value>, ActionError> {
    let invalid = || ActionError::Invalid("Invalid data format. Data must be valid JSON array".to_string());
    match data {
        Value::Array(rows) => Ok(rows.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(rows)) => Ok(rows),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

#[derive(Debug)]
struct WriteTableOp {
    table_id: Input<String>,
    data: Input<Value>,
}

#[async_trait]
impl Operation for WriteTableOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let table = ctx.resolve(&self.table_id)?;
        let rows = rows_of(&ctx.resolve(&self.data)?)?;
        let count = rows.len();
        ctx.services
            .store
            .write_table(&table, rows)
            .await
            .map_err(|e| ActionError::Store(e.to_string()))?;
        debug!(table = %table, rows = count, "Wrote table");
        Ok(Some(json!(count)))
    }
}

// --- MATH ---

#[derive(Debug, Clone, Copy)]
enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

fn zero() -> Input<f64> {
    Input::Literal(0.0)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MathSettings {
    #[serde(default = "zero")]
    a: Input<f64>,
    b: Option<Input<f64>>,
}

struct MathProcessor(MathOp);

impl Processor for MathProcessor {
    fn produces_output(&self) -> bool {
        true
    }

    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: MathSettings = decode(node, bindings)?;
        let identity = match self.0 {
            MathOp::Divide => 1.0,
            _ => 0.0,
        };
        Ok(Box::new(ArithmeticOp {
            op: self.0,
            a: s.a,
            b: s.b.unwrap_or(Input::Literal(identity)),
        }))
    }
}

#[derive(Debug)]
struct ArithmeticOp {
    op: MathOp,
    a: Input<f64>,
    b: Input<f64>,
}

/// Integral results are published as integers.
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[async_trait]
impl Operation for ArithmeticOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let a = ctx.resolve(&self.a)?;
        let b = ctx.resolve(&self.b)?;
        let result = match self.op {
            MathOp::Add => a + b,
            MathOp::Subtract => a - b,
            MathOp::Multiply => a * b,
            MathOp::Divide if b == 0.0 => {
                return Err(ActionError::Invalid("Division by zero".to_string()));
            }
            MathOp::Divide => a / b,
        };
        Ok(Some(json!({ "result": number(result) })))
    }
}
