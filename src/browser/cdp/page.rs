//! One attached page target, implementing [`Browser`] over CDP.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::debug;

use super::client::CdpClient;
use super::protocol::{BoxModel, KeyEventType, MouseEventType, modifier_flags};
use crate::browser::{Browser, BrowserError, ExtractKind};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

pub struct CdpPage {
    client: CdpClient,
    target_id: String,
    session_id: String,
}

impl CdpPage {
    pub(crate) fn new(client: CdpClient, target_id: String, session_id: String) -> Self {
        Self {
            client,
            target_id,
            session_id,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.client
            .call(method, Some(params), Some(&self.session_id))
            .await
    }

    pub(crate) async fn enable_domains(&self) -> Result<(), BrowserError> {
        self.call("Page.enable", json!({})).await?;
        self.call("DOM.enable", json!({})).await?;
        self.call("Runtime.enable", json!({})).await?;
        debug!("Enabled CDP domains for session {}", self.session_id);
        Ok(())
    }

    async fn eval_raw(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let text = exception["exception"]["description"]
                .as_str()
                .or_else(|| exception["text"].as_str())
                .unwrap_or("Unknown error");
            return Err(BrowserError::JavaScript(text.to_string()));
        }
        Ok(result["result"]["value"].clone())
    }

    /// Evaluate a script that queries `selector`, mapping selector syntax errors.
    async fn eval_selector(&self, selector: &str, expression: &str) -> Result<Value, BrowserError> {
        self.eval_raw(expression).await.map_err(|e| match e {
            BrowserError::JavaScript(msg) if msg.contains("SyntaxError") || msg.contains("not a valid selector") => {
                BrowserError::InvalidSelector(selector.to_string())
            }
            other => other,
        })
    }

    async fn query_node(&self, selector: &str) -> Result<i64, BrowserError> {
        let doc = self.call("DOM.getDocument", json!({"depth": 0})).await?;
        let root = doc["root"]["nodeId"]
            .as_i64()
            .ok_or_else(|| BrowserError::Protocol("Missing document root".to_string()))?;

        let found = self
            .call(
                "DOM.querySelector",
                json!({"nodeId": root, "selector": selector}),
            )
            .await
            .map_err(|e| match e {
                BrowserError::Protocol(_) => BrowserError::InvalidSelector(selector.to_string()),
                other => other,
            })?;

        match found["nodeId"].as_i64() {
            Some(id) if id != 0 => Ok(id),
            _ => Err(BrowserError::ElementNotFound(selector.to_string())),
        }
    }

    async fn element_center(&self, selector: &str) -> Result<(f64, f64), BrowserError> {
        let node_id = self.query_node(selector).await?;
        // Off-screen elements have no box model until scrolled into view.
        let _ = self
            .call("DOM.scrollIntoViewIfNeeded", json!({"nodeId": node_id}))
            .await;
        let result = self.call("DOM.getBoxModel", json!({"nodeId": node_id})).await?;
        let model: BoxModel = serde_json::from_value(result["model"].clone())
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        model
            .center()
            .ok_or_else(|| BrowserError::ElementNotFound(selector.to_string()))
    }

    async fn mouse(&self, kind: MouseEventType, x: f64, y: f64, click_count: u32) -> Result<(), BrowserError> {
        self.mouse_with(kind, x, y, click_count, 0).await
    }

    async fn mouse_with(
        &self,
        kind: MouseEventType,
        x: f64,
        y: f64,
        click_count: u32,
        modifiers: i32,
    ) -> Result<(), BrowserError> {
        let mut params = json!({"type": kind, "x": x, "y": y, "modifiers": modifiers});
        if !matches!(kind, MouseEventType::MouseMoved) {
            params["button"] = json!("left");
            params["clickCount"] = json!(click_count);
        }
        self.call("Input.dispatchMouseEvent", params).await?;
        Ok(())
    }

    async fn key(&self, kind: KeyEventType, key: &str, modifiers: i32) -> Result<(), BrowserError> {
        let mut params = json!({"type": kind, "key": key, "modifiers": modifiers});
        if matches!(kind, KeyEventType::KeyDown) {
            if let Some(text) = key_text(key, modifiers) {
                params["text"] = json!(text);
            }
        }
        self.call("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }
}

/// Text a key produces when pressed without command modifiers.
fn key_text(key: &str, modifiers: i32) -> Option<String> {
    if modifiers & !8 != 0 {
        return None;
    }
    match key {
        "Enter" => Some("\r".to_string()),
        "Tab" => Some("\t".to_string()),
        "Space" => Some(" ".to_string()),
        k if k.chars().count() == 1 => Some(k.to_string()),
        _ => None,
    }
}

fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[async_trait]
impl Browser for CdpPage {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let result = self.call("Page.navigate", json!({"url": url})).await?;
        if let Some(err) = result["errorText"].as_str().filter(|e| !e.is_empty()) {
            return Err(BrowserError::NavigationFailed(format!("{}: {}", url, err)));
        }
        self.wait_for_load(NAVIGATION_TIMEOUT).await?;
        debug!("Navigated to {}", url);
        Ok(())
    }

    async fn reload(&self) -> Result<(), BrowserError> {
        self.call("Page.reload", json!({})).await?;
        self.wait_for_load(NAVIGATION_TIMEOUT).await
    }

    async fn click(&self, selector: &str, click_count: u32) -> Result<(), BrowserError> {
        let (x, y) = self.element_center(selector).await?;
        self.mouse(MouseEventType::MouseMoved, x, y, 0).await?;
        for count in 1..=click_count.max(1) {
            self.mouse(MouseEventType::MousePressed, x, y, count).await?;
            self.mouse(MouseEventType::MouseReleased, x, y, count).await?;
        }
        debug!("Clicked {} at ({}, {})", selector, x, y);
        Ok(())
    }

    async fn click_with_modifiers(&self, selector: &str, modifiers: &[String]) -> Result<(), BrowserError> {
        let (x, y) = self.element_center(selector).await?;
        let names: Vec<&str> = modifiers.iter().map(String::as_str).collect();
        let flags = modifier_flags(&names);
        for m in &names {
            self.key(KeyEventType::KeyDown, m, flags).await?;
        }
        self.mouse_with(MouseEventType::MouseMoved, x, y, 0, flags).await?;
        self.mouse_with(MouseEventType::MousePressed, x, y, 1, flags).await?;
        self.mouse_with(MouseEventType::MouseReleased, x, y, 1, flags).await?;
        for m in names.iter().rev() {
            self.key(KeyEventType::KeyUp, m, 0).await?;
        }
        debug!("Clicked {} with {:?}", selector, modifiers);
        Ok(())
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        self.mouse(MouseEventType::MouseMoved, x, y, 0).await
    }

    async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<(), BrowserError> {
        self.mouse(MouseEventType::MouseMoved, from.0, from.1, 0).await?;
        self.mouse(MouseEventType::MousePressed, from.0, from.1, 1).await?;
        // The button has to be reported as held while moving or pages see a hover.
        self.call(
            "Input.dispatchMouseEvent",
            json!({"type": MouseEventType::MouseMoved, "x": to.0, "y": to.1, "button": "left", "buttons": 1}),
        )
        .await?;
        self.mouse(MouseEventType::MouseReleased, to.0, to.1, 1).await
    }

    async fn hover(&self, selector: &str) -> Result<(), BrowserError> {
        let (x, y) = self.element_center(selector).await?;
        self.mouse(MouseEventType::MouseMoved, x, y, 0).await
    }

    async fn focus(&self, selector: &str) -> Result<(), BrowserError> {
        let node_id = self.query_node(selector).await?;
        self.call("DOM.focus", json!({"nodeId": node_id})).await?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), BrowserError> {
        self.call("Input.insertText", json!({"text": text})).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), BrowserError> {
        let parts: Vec<&str> = key.split('+').map(str::trim).filter(|p| !p.is_empty()).collect();
        let Some((main, modifiers)) = parts.split_last() else {
            return Err(BrowserError::Protocol(format!("Empty key: {:?}", key)));
        };
        let flags = modifier_flags(modifiers);
        for m in modifiers {
            self.key(KeyEventType::KeyDown, m, flags).await?;
        }
        self.key(KeyEventType::KeyDown, main, flags).await?;
        self.key(KeyEventType::KeyUp, main, flags).await?;
        for m in modifiers.iter().rev() {
            self.key(KeyEventType::KeyUp, m, 0).await?;
        }
        Ok(())
    }

    async fn key_down(&self, key: &str) -> Result<(), BrowserError> {
        self.key(KeyEventType::KeyDown, key, modifier_flags(&[key])).await
    }

    async fn key_up(&self, key: &str) -> Result<(), BrowserError> {
        self.key(KeyEventType::KeyUp, key, 0).await
    }

    async fn scroll(&self, selector: Option<&str>, x: f64, y: f64) -> Result<(), BrowserError> {
        match selector {
            Some(sel) => {
                let script = format!(
                    "(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollIntoView({{block: 'center'}}); return true; }})()",
                    js_string(sel)
                );
                if self.eval_selector(sel, &script).await? != Value::Bool(true) {
                    return Err(BrowserError::ElementNotFound(sel.to_string()));
                }
            }
            None => {
                self.eval_raw(&format!("window.scrollBy({}, {})", x, y)).await?;
            }
        }
        Ok(())
    }

    async fn extract(&self, selector: &str, kind: &ExtractKind) -> Result<Vec<Value>, BrowserError> {
        let read = match kind {
            ExtractKind::Text => "(el.innerText ?? el.textContent ?? '').trim()".to_string(),
            ExtractKind::Html => "el.innerHTML".to_string(),
            ExtractKind::Attribute(name) => format!("el.getAttribute({})", js_string(name)),
        };
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(el => {})",
            js_string(selector),
            read
        );
        match self.eval_selector(selector, &script).await? {
            Value::Array(values) => Ok(values),
            other => Err(BrowserError::Protocol(format!("Unexpected extract result: {}", other))),
        }
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        self.eval_raw(expression).await
    }

    async fn wait_for_selector(&self, selector: &str, hidden: bool, timeout: Duration) -> Result<(), BrowserError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return !!el && el.getClientRects().length > 0; }})()",
            js_string(selector)
        );
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let visible = self.eval_selector(selector, &script).await? == Value::Bool(true);
            if visible != hidden {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let what = if hidden { "to disappear" } else { "to appear" };
                return Err(BrowserError::Timeout(format!("waiting for {} {}", selector, what)));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<(), BrowserError> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let state = self.eval_raw("document.readyState").await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(BrowserError::Timeout("waiting for page load".to_string()));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let result = self
            .call("Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("Missing screenshot data".to_string()))?;
        STANDARD
            .decode(data)
            .map_err(|e| BrowserError::Protocol(format!("Screenshot decode: {}", e)))
    }

    async fn url(&self) -> Result<String, BrowserError> {
        Ok(self.eval_raw("location.href").await?.as_str().unwrap_or_default().to_string())
    }

    async fn title(&self) -> Result<String, BrowserError> {
        Ok(self.eval_raw("document.title").await?.as_str().unwrap_or_default().to_string())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        debug!("Closing CDP session {}", self.session_id);
        self.client.close().await
    }
}
