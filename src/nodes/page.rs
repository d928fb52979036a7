//! Page, mouse and keyboard interaction nodes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{CompiledScopes, Processor, ProcessorRegistry, decode, invalid};
use crate::dsl::{Binding, Node};
use crate::error::{ActionError, GraphError};
use crate::runtime::context::{Context, Input};
use crate::runtime::program::Operation;
use crate::tools::Action;

pub fn register(registry: &mut ProcessorRegistry) {
    registry.register_all(&["page-navigate", "new-tab", "open-url"], Arc::new(NavigateProcessor));
    registry.register_all(&["page-click", "mouse-click"], Arc::new(ClickProcessor { double: false }));
    registry.register("mouse-double-click", Arc::new(ClickProcessor { double: true }));
    registry.register("mouse-hover", Arc::new(HoverProcessor));
    registry.register("mouse-click-modified", Arc::new(ModifiedClickProcessor));
    registry.register("mouse-move", Arc::new(MouseMoveProcessor));
    registry.register("mouse-drag-drop", Arc::new(DragDropProcessor));
    registry.register("reload-page", Arc::new(ReloadProcessor));
    registry.register_all(&["page-type", "keyboard-focus-type"], Arc::new(TypeProcessor));
    registry.register("keyboard-type", Arc::new(KeyboardTypeProcessor));
    registry.register("keyboard-press", Arc::new(KeyPressProcessor));
    registry.register("keyboard-down", Arc::new(KeyHoldProcessor));
    registry.register("keyboard-shortcut", Arc::new(ShortcutProcessor));
    registry.register_all(&["page-scroll", "mouse-wheel"], Arc::new(ScrollProcessor));
    registry.register_prefix("page-", Arc::new(PageGestureProcessor));
}

async fn pause(delay_ms: u64) {
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

// --- NAVIGATE ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct NavigateSettings {
    url: Input<String>,
    timeout: Option<u64>,
}

struct NavigateProcessor;

impl Processor for NavigateProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: NavigateSettings = decode(node, bindings)?;
        Ok(Box::new(NavigateOp {
            url: s.url,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct NavigateOp {
    url: Input<String>,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Operation for NavigateOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let url = ctx.resolve(&self.url)?;
        if url.trim().is_empty() {
            return Err(ActionError::Invalid("URL is empty".to_string()));
        }
        ctx.perform(&Action::Navigate {
            url,
            timeout_ms: self.timeout_ms,
        })
        .await?;
        Ok(None)
    }
}

// --- CLICK ---

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ClickType {
    #[default]
    Single,
    Double,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ClickSettings {
    selector: Input<String>,
    #[serde(default)]
    click_type: ClickType,
    #[serde(default)]
    delay: u64,
    timeout: Option<u64>,
}

struct ClickProcessor {
    double: bool,
}

impl Processor for ClickProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ClickSettings = decode(node, bindings)?;
        let double = self.double || s.click_type == ClickType::Double;
        Ok(Box::new(ClickOp {
            selector: s.selector,
            click_count: if double { 2 } else { 1 },
            delay_ms: s.delay,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct ClickOp {
    selector: Input<String>,
    click_count: u32,
    delay_ms: u64,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Operation for ClickOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let selector = ctx.resolve(&self.selector)?;
        pause(self.delay_ms).await;
        ctx.perform(&Action::Click {
            selector,
            click_count: self.click_count,
            timeout_ms: self.timeout_ms,
        })
        .await?;
        Ok(None)
    }
}

// --- MODIFIED CLICK ---

const MODIFIERS: &[&str] = &["alt", "control", "ctrl", "meta", "command", "cmd", "shift"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ModifiedClickSettings {
    selector: Input<String>,
    #[serde(default)]
    modifiers: Vec<String>,
    #[serde(default)]
    delay: u64,
    timeout: Option<u64>,
}

struct ModifiedClickProcessor;

impl Processor for ModifiedClickProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ModifiedClickSettings = decode(node, bindings)?;
        if let Some(unknown) = s
            .modifiers
            .iter()
            .find(|m| !MODIFIERS.contains(&m.to_lowercase().as_str()))
        {
            return Err(invalid(node, format!("unknown modifier key '{}'", unknown)));
        }
        Ok(Box::new(ModifiedClickOp {
            selector: s.selector,
            modifiers: s.modifiers,
            delay_ms: s.delay,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct ModifiedClickOp {
    selector: Input<String>,
    modifiers: Vec<String>,
    delay_ms: u64,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Operation for ModifiedClickOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let selector = ctx.resolve(&self.selector)?;
        pause(self.delay_ms).await;
        ctx.perform(&Action::ModifiedClick {
            selector,
            modifiers: self.modifiers.clone(),
            timeout_ms: self.timeout_ms,
        })
        .await?;
        Ok(None)
    }
}

// --- POINTER ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct MouseMoveSettings {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
}

struct MouseMoveProcessor;

impl Processor for MouseMoveProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: MouseMoveSettings = decode(node, bindings)?;
        Ok(Box::new(ActionOp(Action::MouseMove { x: s.x, y: s.y })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct DragDropSettings {
    #[serde(default)]
    start_x: f64,
    #[serde(default)]
    start_y: f64,
    #[serde(default)]
    end_x: f64,
    #[serde(default)]
    end_y: f64,
}

struct DragDropProcessor;

impl Processor for DragDropProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: DragDropSettings = decode(node, bindings)?;
        Ok(Box::new(ActionOp(Action::DragDrop {
            from: (s.start_x, s.start_y),
            to: (s.end_x, s.end_y),
        })))
    }
}

// --- RELOAD ---

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WaitUntil {
    #[default]
    Load,
    Domcontentloaded,
    Networkidle0,
    Networkidle2,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ReloadSettings {
    /// Accepted for editor compatibility; every state waits for a complete document.
    #[serde(default)]
    #[allow(dead_code)]
    wait_until: WaitUntil,
    timeout: Option<u64>,
}

struct ReloadProcessor;

impl Processor for ReloadProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ReloadSettings = decode(node, bindings)?;
        Ok(Box::new(ActionOp(Action::Reload { timeout_ms: s.timeout })))
    }
}

// --- HOVER ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct HoverSettings {
    selector: Input<String>,
    timeout: Option<u64>,
}

struct HoverProcessor;

impl Processor for HoverProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: HoverSettings = decode(node, bindings)?;
        Ok(Box::new(GestureOp {
            gesture: Gesture::Hover,
            selector: s.selector,
            timeout_ms: s.timeout,
        }))
    }
}

// --- TYPE ---

fn input_selector() -> Input<String> {
    Input::Literal("input".to_string())
}

/// `page-type` and `keyboard-focus-type`: focus an element, then type.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct TypeSettings {
    #[serde(default = "input_selector")]
    selector: Input<String>,
    text: Input<String>,
    #[serde(default)]
    clear_before: bool,
    #[serde(default)]
    press_enter: bool,
    #[serde(default)]
    delay: u64,
    timeout: Option<u64>,
}

struct TypeProcessor;

impl Processor for TypeProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: TypeSettings = decode(node, bindings)?;
        Ok(Box::new(TypeOp {
            selector: Some(s.selector),
            text: s.text,
            clear: s.clear_before,
            press_enter: s.press_enter,
            delay_ms: s.delay,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct KeyboardTypeSettings {
    text: Input<String>,
    #[serde(default)]
    delay: u64,
}

/// `keyboard-type`: type into whatever has focus.
struct KeyboardTypeProcessor;

impl Processor for KeyboardTypeProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: KeyboardTypeSettings = decode(node, bindings)?;
        Ok(Box::new(TypeOp {
            selector: None,
            text: s.text,
            clear: false,
            press_enter: false,
            delay_ms: s.delay,
            timeout_ms: None,
        }))
    }
}

#[derive(Debug)]
struct TypeOp {
    selector: Option<Input<String>>,
    text: Input<String>,
    clear: bool,
    press_enter: bool,
    delay_ms: u64,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Operation for TypeOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let text = ctx.resolve(&self.text)?;
        if text.is_empty() {
            return Err(ActionError::Invalid("Text to type is empty".to_string()));
        }
        let selector = self.selector.as_ref().map(|s| ctx.resolve(s)).transpose()?;
        pause(self.delay_ms).await;
        ctx.perform(&Action::Type {
            selector,
            text,
            clear: self.clear,
            press_enter: self.press_enter,
            timeout_ms: self.timeout_ms,
        })
        .await?;
        Ok(None)
    }
}

// --- KEYS ---

fn enter() -> String {
    "Enter".to_string()
}

fn shift() -> String {
    "Shift".to_string()
}

fn one_second() -> u64 {
    1_000
}

fn copy_shortcut() -> String {
    "Control+C".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct KeyPressSettings {
    #[serde(default = "enter")]
    key: String,
}

struct KeyPressProcessor;

impl Processor for KeyPressProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: KeyPressSettings = decode(node, bindings)?;
        Ok(Box::new(ActionOp(Action::PressKey { key: s.key })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct KeyHoldSettings {
    #[serde(default = "shift")]
    key: String,
    #[serde(default = "one_second")]
    duration: u64,
}

/// `keyboard-down`: hold a key for `duration` milliseconds.
struct KeyHoldProcessor;

impl Processor for KeyHoldProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: KeyHoldSettings = decode(node, bindings)?;
        if s.key.trim().is_empty() {
            return Err(invalid(node, "key is empty"));
        }
        Ok(Box::new(ActionOp(Action::HoldKey {
            key: s.key,
            duration_ms: s.duration,
        })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ShortcutSettings {
    #[serde(default = "copy_shortcut")]
    shortcut: String,
}

struct ShortcutProcessor;

impl Processor for ShortcutProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ShortcutSettings = decode(node, bindings)?;
        if s.shortcut.split('+').any(|k| k.trim().is_empty()) {
            return Err(invalid(node, format!("malformed shortcut '{}'", s.shortcut)));
        }
        Ok(Box::new(ActionOp(Action::Shortcut { keys: s.shortcut })))
    }
}

/// A fixed tool action with no bound inputs.
#[derive(Debug)]
pub(crate) struct ActionOp(pub(crate) Action);

#[async_trait]
impl Operation for ActionOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        Ok(ctx.perform(&self.0).await?.into_value())
    }
}

// --- SCROLL ---

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct ScrollSettings {
    selector: Option<Input<String>>,
    /// Absolute position (`page-scroll`).
    scroll_x: Option<f64>,
    scroll_y: Option<f64>,
    /// Relative wheel deltas (`mouse-wheel`).
    delta_x: Option<f64>,
    delta_y: Option<f64>,
}

struct ScrollProcessor;

impl Processor for ScrollProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: ScrollSettings = decode(node, bindings)?;
        let mode = if let Some(selector) = s.selector {
            ScrollMode::Element(selector)
        } else if s.delta_x.is_some() || s.delta_y.is_some() || node.kind == "mouse-wheel" {
            ScrollMode::By(s.delta_x.unwrap_or(0.0), s.delta_y.unwrap_or(100.0))
        } else {
            ScrollMode::To(s.scroll_x.unwrap_or(0.0), s.scroll_y.unwrap_or(0.0))
        };
        Ok(Box::new(ScrollOp { mode }))
    }
}

#[derive(Debug)]
enum ScrollMode {
    Element(Input<String>),
    To(f64, f64),
    By(f64, f64),
}

#[derive(Debug)]
struct ScrollOp {
    mode: ScrollMode,
}

#[async_trait]
impl Operation for ScrollOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let action = match &self.mode {
            ScrollMode::Element(selector) => Action::Scroll {
                selector: Some(ctx.resolve(selector)?),
                x: 0.0,
                y: 0.0,
            },
            ScrollMode::By(x, y) => Action::Scroll {
                selector: None,
                x: *x,
                y: *y,
            },
            ScrollMode::To(x, y) => Action::Evaluate {
                expression: format!("window.scrollTo({}, {})", x, y),
            },
        };
        ctx.perform(&action).await?;
        Ok(None)
    }
}

// --- GENERIC PAGE GESTURE (page-* fallback) ---

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Gesture {
    #[default]
    Click,
    Hover,
    Focus,
    Scroll,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct GestureSettings {
    selector: Input<String>,
    #[serde(default)]
    action: Gesture,
    timeout: Option<u64>,
}

/// Last-resort processor for `page-*` types without their own registration.
struct PageGestureProcessor;

impl Processor for PageGestureProcessor {
    fn compile(&self, node: &Node, bindings: &[Binding], _: CompiledScopes) -> Result<Box<dyn Operation>, GraphError> {
        let s: GestureSettings = decode(node, bindings)?;
        Ok(Box::new(GestureOp {
            gesture: s.action,
            selector: s.selector,
            timeout_ms: s.timeout,
        }))
    }
}

#[derive(Debug)]
struct GestureOp {
    gesture: Gesture,
    selector: Input<String>,
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Operation for GestureOp {
    async fn execute(&self, ctx: &mut Context<'_>) -> Result<Option<Value>, ActionError> {
        let selector = ctx.resolve(&self.selector)?;
        let timeout_ms = self.timeout_ms;
        let action = match self.gesture {
            Gesture::Click => Action::Click {
                selector,
                click_count: 1,
                timeout_ms,
            },
            Gesture::Hover => Action::Hover { selector, timeout_ms },
            Gesture::Focus => Action::Focus { selector, timeout_ms },
            Gesture::Scroll => Action::Scroll {
                selector: Some(selector),
                x: 0.0,
                y: 0.0,
            },
        };
        ctx.perform(&action).await?;
        Ok(None)
    }
}
