//! Bounded waits. Every wait carries its own timeout.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::page::ActionOp;
use super::{CompiledScopes, Processor, ProcessorRegistry, decode, invalid};
use crate::dsl::{Binding, Node};
use crate::error::{ActionError, GraphError};
use crate::runtime::context::{Context, Input};
use crate::runtime::program::Operation;
use crate::tools::{Action, WaitCondition};

const DEFAULT_WAIT_MS: u64 = 30_000;

pub fn register(registry: &mut ProcessorRegistry) {
    registry.register("wait-timeout", Arc::new(DelayProcessor));
    registry.register("wait-element", Arc::new(ElementProcessor { hidden: false }));
    registry.register("wait-element-hidden", Arc::new(ElementProcessor { hidden: true }));
    registry.register_all(
        &["wait-load", "wait-dom-loaded", "wait-network-idle"],
        Arc::new(LoadProcessor),
    );
    registry.register("wait-navigation", Arc::new(NavigationProcessor));
    registry.register("wait-function", Arc::new(FunctionProcessor));
}

fn two_seconds() -> u64 {
    2_000
}

fn thirty_seconds() -> u64 {
    DEFAULT_WAIT_MS
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DelaySettings {
    #[serde(default = "two_seconds")]
    timeout: u64,
}

struct DelayProcessor;

impl Processor for DelayProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: DelaySettings = decode(node, bindings)?;
        Ok(Box::new(ActionOp(Action::Wait {
            until: WaitCondition::Delay { ms: s.timeout },
            timeout_ms: None,
        })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ElementSettings {
    selector: Input<String>,
    #[serde(default = "thirty_seconds")]
    timeout: u64,
}

struct ElementProcessor {
    hidden: bool,
}

impl Processor for ElementProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ElementSettings = decode(node, bindings)?;
        Ok(Box::new(WaitElementOp {
            selector: s.selector,
            hidden: self.hidden,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct WaitElementOp {
    selector: Input<String>,
    hidden: bool,
    timeout_ms: u64,
}

#[async_trait]
impl Operation for WaitElementOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let selector = ctx.resolve(&self.selector)?;
        ctx.perform(&Action::Wait {
            until: WaitCondition::Selector {
                selector,
                hidden: self.hidden,
            },
            timeout_ms: Some(self.timeout_ms),
        })
        .await?;
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoadSettings {
    /// `load`, `domcontentloaded` or `networkidle`; all wait for a complete document.
    state: Option<String>,
    #[serde(default = "thirty_seconds")]
    timeout: u64,
}

struct LoadProcessor;

impl Processor for LoadProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: LoadSettings = decode(node, bindings)?;
        if let Some(state) = s.state.as_deref() {
            if !matches!(state, "load" | "domcontentloaded" | "networkidle") {
                return Err(invalid(node, format!("unknown load state '{}'", state)));
            }
        }
        Ok(Box::new(ActionOp(Action::Wait {
            until: WaitCondition::Load,
            timeout_ms: Some(s.timeout),
        })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NavigationSettings {
    /// Element whose click triggers the navigation.
    selector: Option<Input<String>>,
    #[serde(default = "thirty_seconds")]
    timeout: u64,
}

struct NavigationProcessor;

impl Processor for NavigationProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: NavigationSettings = decode(node, bindings)?;
        Ok(Box::new(WaitNavigationOp {
            selector: s.selector,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct WaitNavigationOp {
    selector: Option<Input<String>>,
    timeout_ms: u64,
}

#[async_trait]
impl Operation for WaitNavigationOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        if let Some(selector) = &self.selector {
            let selector = ctx.resolve(selector)?;
            ctx.perform(&Action::Click {
                selector,
                click_count: 1,
                timeout_ms: Some(self.timeout_ms),
            })
            .await?;
        }
        ctx.perform(&Action::Wait {
            until: WaitCondition::Load,
            timeout_ms: Some(self.timeout_ms),
        })
        .await?;
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FunctionSettings {
    function: String,
    #[serde(default = "thirty_seconds")]
    timeout: u64,
}

struct FunctionProcessor;

impl Processor for FunctionProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: FunctionSettings = decode(node, bindings)?;
        if s.function.trim().is_empty() {
            return Err(invalid(node, "function is empty"));
        }
        Ok(Box::new(ActionOp(Action::Wait {
            until: WaitCondition::Function {
                expression: as_expression(&s.function),
            },
            timeout_ms: Some(s.timeout),
        })))
    }
}

/// Function sources are invoked; bare expressions are polled as-is.
fn as_expression(source: &str) -> String {
    let source = source.trim();
    if source.starts_with("function") || source.contains("=>") {
        format!("({})()", source)
    } else {
        source.to_string()
    }
}
