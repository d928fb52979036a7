#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use browserflow::agent::{ChatMessage, LanguageModel, LlmError};
use browserflow::browser::{Browser, BrowserError, Connector, ExtractKind};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Scripted page shared by a [`MockConnector`] and every browser it hands out.
#[derive(Default)]
pub struct MockState {
    pub url: String,
    pub title: String,
    /// selector → text of every matching element
    pub elements: HashMap<String, Vec<String>>,
    /// Pages the mock can navigate to: url → (title, elements)
    pub pages: HashMap<String, (String, HashMap<String, Vec<String>>)>,
    pub evaluations: HashMap<String, Value>,
    pub log: Vec<String>,
    pub closed: bool,
    pub panic_on: Option<String>,
    pub fail_screenshots: bool,
}

#[derive(Clone, Default)]
pub struct MockPage {
    pub state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(self, selector: &str, text: &str) -> Self {
        self.state
            .lock()
            .elements
            .entry(selector.to_string())
            .or_default()
            .push(text.to_string());
        self
    }

    pub fn with_page(self, url: &str, title: &str, elements: &[(&str, &str)]) -> Self {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (selector, text) in elements {
            map.entry(selector.to_string()).or_default().push(text.to_string());
        }
        self.state
            .lock()
            .pages
            .insert(url.to_string(), (title.to_string(), map));
        self
    }

    pub fn with_evaluation(self, expression: &str, value: Value) -> Self {
        self.state
            .lock()
            .evaluations
            .insert(expression.to_string(), value);
        self
    }

    pub fn panicking_on(self, selector: &str) -> Self {
        self.state.lock().panic_on = Some(selector.to_string());
        self
    }

    pub fn failing_screenshots(self) -> Self {
        self.state.lock().fail_screenshots = true;
        self
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

pub struct MockBrowser {
    state: Arc<Mutex<MockState>>,
}

fn check_selector(selector: &str) -> Result<(), BrowserError> {
    if selector.contains('[') && !selector.contains(']') {
        return Err(BrowserError::InvalidSelector(selector.to_string()));
    }
    Ok(())
}

impl MockBrowser {
    fn open(&self) -> Result<parking_lot::MutexGuard<'_, MockState>, BrowserError> {
        let state = self.state.lock();
        if state.closed {
            return Err(BrowserError::Disconnected);
        }
        Ok(state)
    }

    fn element(&self, selector: &str, verb: &str) -> Result<(), BrowserError> {
        check_selector(selector)?;
        let mut state = self.open()?;
        if state.panic_on.as_deref() == Some(selector) {
            drop(state);
            panic!("scripted panic on {}", selector);
        }
        if !state.elements.get(selector).is_some_and(|e| !e.is_empty()) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        state.log.push(format!("{} {}", verb, selector));
        Ok(())
    }
}

#[async_trait]
impl Browser for MockBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.open()?;
        state.log.push(format!("navigate {}", url));
        state.url = url.to_string();
        if let Some((title, elements)) = state.pages.get(url).cloned() {
            state.title = title;
            state.elements = elements;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.open()?.log.push("reload".to_string());
        Ok(())
    }

    async fn click(&self, selector: &str, click_count: u32) -> Result<(), BrowserError> {
        self.element(selector, &format!("click x{}", click_count))
    }

    async fn click_with_modifiers(&self, selector: &str, modifiers: &[String]) -> Result<(), BrowserError> {
        self.element(selector, &format!("click+{}", modifiers.join("+")))
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.open()?.log.push(format!("move {} {}", x, y));
        Ok(())
    }

    async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<(), BrowserError> {
        self.open()?
            .log
            .push(format!("drag {} {} -> {} {}", from.0, from.1, to.0, to.1));
        Ok(())
    }

    async fn hover(&self, selector: &str) -> Result<(), BrowserError> {
        self.element(selector, "hover")
    }

    async fn focus(&self, selector: &str) -> Result<(), BrowserError> {
        self.element(selector, "focus")
    }

    async fn insert_text(&self, text: &str) -> Result<(), BrowserError> {
        self.open()?.log.push(format!("type {}", text));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        self.open()?.log.push(format!("key {}", key));
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<(), BrowserError> {
        self.open()?.log.push(format!("keydown {}", key));
        Ok(())
    }

    async fn key_up(&self, key: &str) -> Result<(), BrowserError> {
        self.open()?.log.push(format!("keyup {}", key));
        Ok(())
    }

    async fn scroll(&self, selector: Option<&str>, x: f64, y: f64) -> Result<(), BrowserError> {
        self.open()?
            .log
            .push(format!("scroll {} {} {}", selector.unwrap_or("window"), x, y));
        Ok(())
    }

    async fn extract(&self, selector: &str, kind: &ExtractKind) -> Result<Vec<Value>, BrowserError> {
        check_selector(selector)?;
        let state = self.open()?;
        let texts = state.elements.get(selector).cloned().unwrap_or_default();
        Ok(texts
            .into_iter()
            .map(|text| match kind {
                ExtractKind::Text => Value::String(text),
                ExtractKind::Html => Value::String(format!("<span>{}</span>", text)),
                ExtractKind::Attribute(name) => Value::String(format!("{}={}", name, text)),
            })
            .collect())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let mut state = self.open()?;
        state.log.push(format!("eval {}", expression));
        Ok(state.evaluations.get(expression).cloned().unwrap_or(Value::Null))
    }

    async fn wait_for_selector(&self, selector: &str, hidden: bool, _timeout: Duration) -> Result<(), BrowserError> {
        check_selector(selector)?;
        let state = self.open()?;
        let present = state.elements.get(selector).is_some_and(|e| !e.is_empty());
        if present != hidden {
            Ok(())
        } else {
            Err(BrowserError::Timeout(format!("waiting for {}", selector)))
        }
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<(), BrowserError> {
        self.open()?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let state = self.open()?;
        if state.fail_screenshots {
            return Err(BrowserError::Protocol("capture failed".to_string()));
        }
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn url(&self) -> Result<String, BrowserError> {
        Ok(self.open()?.url.clone())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.open()?.title.clone())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let mut state = self.state.lock();
        state.closed = true;
        state.log.push("close".to_string());
        Ok(())
    }
}

pub struct MockConnector {
    pub page: MockPage,
    pub fail: bool,
    pub connects: AtomicUsize,
}

impl MockConnector {
    pub fn new(page: MockPage) -> Arc<Self> {
        Arc::new(Self {
            page,
            fail: false,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            page: MockPage::new(),
            fail: true,
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Browser>, BrowserError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BrowserError::Protocol(format!("connection refused: {}", endpoint)));
        }
        self.page.state.lock().closed = false;
        Ok(Box::new(MockBrowser {
            state: self.page.state.clone(),
        }))
    }
}

/// Language model that answers from a fixed script, one reply per call.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
    /// Cancel this token once the given number of calls has been answered.
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    /// Panic instead of answering this call (1-based).
    panic_at: Mutex<Option<usize>>,
}

impl ScriptedModel {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self::from_results(
            replies.iter().map(|r| Ok(r.to_string())).collect(),
        ))
    }

    pub fn from_results(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            cancel_after: Mutex::new(None),
            panic_at: Mutex::new(None),
        }
    }

    pub fn panicking_at(self: Arc<Self>, call: usize) -> Arc<Self> {
        *self.panic_at.lock() = Some(call);
        self
    }

    pub fn cancel_after(&self, calls: usize, token: CancellationToken) {
        *self.cancel_after.lock() = Some((calls, token));
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    /// User message of call `index`.
    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock()[index]
            .iter()
            .filter(|m| m.role == browserflow::agent::Role::User)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let calls = {
            let mut prompts = self.prompts.lock();
            prompts.push(messages.to_vec());
            prompts.len()
        };
        let panic_at = *self.panic_at.lock();
        if panic_at == Some(calls) {
            panic!("boom");
        }
        let reply = self
            .replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("script exhausted".to_string())));
        if let Some((after, token)) = self.cancel_after.lock().as_ref() {
            if calls >= *after {
                token.cancel();
            }
        }
        reply
    }
}
