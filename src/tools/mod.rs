//! Primitive browser operations shared by compiled workflows and the agent.
//!
//! Every [`Action`] carries its own timeout; the controllers above never
//! distinguish a timeout from any other failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{Instant, sleep, timeout};
use tracing::debug;

use crate::browser::{Browser, BrowserError, ExtractKind};
use crate::error::ActionError;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn one() -> u32 {
    1
}

/// What a [`Action::Wait`] waits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitCondition {
    Delay { ms: u64 },
    Selector {
        selector: String,
        #[serde(default)]
        hidden: bool,
    },
    Load,
    /// A JavaScript expression polled until it is truthy.
    Function { expression: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Navigate {
        url: String,
        timeout_ms: Option<u64>,
    },
    Click {
        selector: String,
        #[serde(default = "one")]
        click_count: u32,
        timeout_ms: Option<u64>,
    },
    /// Single click with modifier keys such as `Shift` held down.
    ModifiedClick {
        selector: String,
        modifiers: Vec<String>,
        timeout_ms: Option<u64>,
    },
    /// Pointer move to viewport coordinates.
    MouseMove {
        x: f64,
        y: f64,
    },
    DragDrop {
        from: (f64, f64),
        to: (f64, f64),
    },
    Hover {
        selector: String,
        timeout_ms: Option<u64>,
    },
    Focus {
        selector: String,
        timeout_ms: Option<u64>,
    },
    /// Type into `selector`, or into the focused element when absent.
    Type {
        selector: Option<String>,
        text: String,
        #[serde(default)]
        clear: bool,
        #[serde(default)]
        press_enter: bool,
        timeout_ms: Option<u64>,
    },
    PressKey {
        key: String,
    },
    /// `+`-joined key combination such as `Control+C`.
    Shortcut {
        keys: String,
    },
    /// Hold `key` down for `duration_ms`, then release it.
    HoldKey {
        key: String,
        duration_ms: u64,
    },
    Reload {
        timeout_ms: Option<u64>,
    },
    Scroll {
        selector: Option<String>,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Extract {
        selector: String,
        attribute: Option<String>,
        #[serde(default)]
        html: bool,
        #[serde(default)]
        all: bool,
        timeout_ms: Option<u64>,
    },
    Wait {
        until: WaitCondition,
        timeout_ms: Option<u64>,
    },
    Evaluate {
        expression: String,
    },
    Screenshot,
}

/// Result of a performed action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    None,
    Value(Value),
    Screenshot(Vec<u8>),
}

impl ActionOutput {
    /// The value a node publishes as its named output.
    pub fn into_value(self) -> Option<Value> {
        match self {
            ActionOutput::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Short textual form recorded as an agent step result.
    pub fn describe(&self) -> String {
        match self {
            ActionOutput::None => "ok".to_string(),
            ActionOutput::Value(Value::String(s)) => s.clone(),
            ActionOutput::Value(v) => v.to_string(),
            ActionOutput::Screenshot(bytes) => format!("screenshot ({} bytes)", bytes.len()),
        }
    }
}

/// Prefix `https://` when the URL has no scheme.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.contains("://") || url.starts_with("about:") || url.starts_with("data:") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Click { .. } => "click",
            Action::ModifiedClick { .. } => "modified_click",
            Action::MouseMove { .. } => "mouse_move",
            Action::DragDrop { .. } => "drag_drop",
            Action::Hover { .. } => "hover",
            Action::Focus { .. } => "focus",
            Action::Type { .. } => "type",
            Action::PressKey { .. } => "press_key",
            Action::Shortcut { .. } => "shortcut",
            Action::HoldKey { .. } => "hold_key",
            Action::Reload { .. } => "reload",
            Action::Scroll { .. } => "scroll",
            Action::Extract { .. } => "extract",
            Action::Wait { .. } => "wait",
            Action::Evaluate { .. } => "evaluate",
            Action::Screenshot => "screenshot",
        }
    }

    /// Human readable form used in logs and timeout errors.
    pub fn describe(&self) -> String {
        match self {
            Action::Navigate { url, .. } => format!("navigate to {}", url),
            Action::Click { selector, .. } => format!("click {}", selector),
            Action::ModifiedClick {
                selector, modifiers, ..
            } => format!("{}+click {}", modifiers.join("+"), selector),
            Action::MouseMove { x, y } => format!("move mouse to ({}, {})", x, y),
            Action::DragDrop { from, to } => format!("drag ({}, {}) to ({}, {})", from.0, from.1, to.0, to.1),
            Action::Hover { selector, .. } => format!("hover {}", selector),
            Action::Focus { selector, .. } => format!("focus {}", selector),
            Action::Type { selector: Some(s), .. } => format!("type into {}", s),
            Action::Type { selector: None, .. } => "type into focused element".to_string(),
            Action::PressKey { key } => format!("press {}", key),
            Action::Shortcut { keys } => format!("shortcut {}", keys),
            Action::HoldKey { key, duration_ms } => format!("hold {} for {}ms", key, duration_ms),
            Action::Reload { .. } => "reload page".to_string(),
            Action::Scroll { selector: Some(s), .. } => format!("scroll to {}", s),
            Action::Scroll { x, y, .. } => format!("scroll by ({}, {})", x, y),
            Action::Extract { selector, .. } => format!("extract {}", selector),
            Action::Wait { until, .. } => match until {
                WaitCondition::Delay { ms } => format!("wait {}ms", ms),
                WaitCondition::Selector { selector, hidden: false } => format!("wait for {}", selector),
                WaitCondition::Selector { selector, hidden: true } => format!("wait for {} to hide", selector),
                WaitCondition::Load => "wait for load".to_string(),
                WaitCondition::Function { expression } => format!("wait until {}", expression),
            },
            Action::Evaluate { .. } => "evaluate script".to_string(),
            Action::Screenshot => "screenshot".to_string(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout_with(DEFAULT_TIMEOUT_MS)
    }

    /// Timeout of this action when unset ones fall back to `default_ms`.
    pub fn timeout_with(&self, default_ms: u64) -> Duration {
        let ms = match self {
            Action::Navigate { timeout_ms, .. }
            | Action::Click { timeout_ms, .. }
            | Action::ModifiedClick { timeout_ms, .. }
            | Action::Reload { timeout_ms, .. }
            | Action::Hover { timeout_ms, .. }
            | Action::Focus { timeout_ms, .. }
            | Action::Type { timeout_ms, .. }
            | Action::Extract { timeout_ms, .. } => timeout_ms.unwrap_or(default_ms),
            Action::Wait {
                until: WaitCondition::Delay { ms },
                timeout_ms,
            } => timeout_ms.unwrap_or(default_ms).max(ms.saturating_add(1_000)),
            Action::HoldKey { duration_ms, .. } => default_ms.max(duration_ms.saturating_add(1_000)),
            Action::Wait { timeout_ms, .. } => timeout_ms.unwrap_or(default_ms),
            _ => default_ms,
        };
        Duration::from_millis(ms)
    }

    /// Run the action against `browser`, bounded by its own timeout.
    pub async fn perform(&self, browser: &dyn Browser) -> Result<ActionOutput, ActionError> {
        self.perform_within(browser, DEFAULT_TIMEOUT_MS).await
    }

    pub async fn perform_within(&self, browser: &dyn Browser, default_ms: u64) -> Result<ActionOutput, ActionError> {
        let limit = self.timeout_with(default_ms);
        let timeout_ms = limit.as_millis() as u64;
        debug!(action = self.name(), "Performing {}", self.describe());

        match timeout(limit, self.run(browser, limit)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(BrowserError::Timeout(what))) => Err(ActionError::Timeout { what, timeout_ms }),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ActionError::Timeout {
                what: self.describe(),
                timeout_ms,
            }),
        }
    }

    async fn run(&self, browser: &dyn Browser, limit: Duration) -> Result<ActionOutput, BrowserError> {
        match self {
            Action::Navigate { url, .. } => {
                browser.navigate(&normalize_url(url)).await?;
                Ok(ActionOutput::None)
            }
            Action::Click {
                selector,
                click_count,
                ..
            } => {
                browser.wait_for_selector(selector, false, limit).await?;
                browser.click(selector, *click_count).await?;
                Ok(ActionOutput::None)
            }
            Action::ModifiedClick {
                selector, modifiers, ..
            } => {
                browser.wait_for_selector(selector, false, limit).await?;
                browser.click_with_modifiers(selector, modifiers).await?;
                Ok(ActionOutput::None)
            }
            Action::MouseMove { x, y } => {
                browser.mouse_move(*x, *y).await?;
                Ok(ActionOutput::None)
            }
            Action::DragDrop { from, to } => {
                browser.drag(*from, *to).await?;
                Ok(ActionOutput::None)
            }
            Action::Hover { selector, .. } => {
                browser.wait_for_selector(selector, false, limit).await?;
                browser.hover(selector).await?;
                Ok(ActionOutput::None)
            }
            Action::Focus { selector, .. } => {
                browser.wait_for_selector(selector, false, limit).await?;
                browser.focus(selector).await?;
                Ok(ActionOutput::None)
            }
            Action::Type {
                selector,
                text,
                clear,
                press_enter,
                ..
            } => {
                if let Some(sel) = selector {
                    browser.wait_for_selector(sel, false, limit).await?;
                    browser.focus(sel).await?;
                    if *clear {
                        let script = format!(
                            "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
                            Value::String(sel.clone())
                        );
                        browser.evaluate(&script).await?;
                    }
                }
                browser.insert_text(text).await?;
                if *press_enter {
                    browser.press_key("Enter").await?;
                }
                Ok(ActionOutput::None)
            }
            Action::PressKey { key } => {
                browser.press_key(key).await?;
                Ok(ActionOutput::None)
            }
            Action::Shortcut { keys } => {
                browser.press_key(keys).await?;
                Ok(ActionOutput::None)
            }
            Action::HoldKey { key, duration_ms } => {
                browser.key_down(key).await?;
                sleep(Duration::from_millis(*duration_ms)).await;
                browser.key_up(key).await?;
                Ok(ActionOutput::None)
            }
            Action::Reload { .. } => {
                browser.reload().await?;
                Ok(ActionOutput::None)
            }
            Action::Scroll { selector, x, y } => {
                browser.scroll(selector.as_deref(), *x, *y).await?;
                Ok(ActionOutput::None)
            }
            Action::Extract {
                selector,
                attribute,
                html,
                all,
                ..
            } => {
                let kind = match (attribute, html) {
                    (Some(name), _) => ExtractKind::Attribute(name.clone()),
                    (None, true) => ExtractKind::Html,
                    (None, false) => ExtractKind::Text,
                };
                let mut values = browser.extract(selector, &kind).await?;
                if *all {
                    return Ok(ActionOutput::Value(Value::Array(values)));
                }
                if values.is_empty() {
                    return Err(BrowserError::ElementNotFound(selector.clone()));
                }
                Ok(ActionOutput::Value(values.swap_remove(0)))
            }
            Action::Wait { until, .. } => {
                match until {
                    WaitCondition::Delay { ms } => sleep(Duration::from_millis(*ms)).await,
                    WaitCondition::Selector { selector, hidden } => {
                        browser.wait_for_selector(selector, *hidden, limit).await?
                    }
                    WaitCondition::Load => browser.wait_for_load(limit).await?,
                    WaitCondition::Function { expression } => {
                        wait_for_truthy(browser, expression, limit).await?
                    }
                }
                Ok(ActionOutput::None)
            }
            Action::Evaluate { expression } => Ok(ActionOutput::Value(browser.evaluate(expression).await?)),
            Action::Screenshot => Ok(ActionOutput::Screenshot(browser.screenshot().await?)),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

async fn wait_for_truthy(browser: &dyn Browser, expression: &str, limit: Duration) -> Result<(), BrowserError> {
    let deadline = Instant::now().checked_add(limit);
    loop {
        if truthy(&browser.evaluate(expression).await?) {
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BrowserError::Timeout(format!("waiting until {}", expression)));
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tagged_actions() {
        let action: Action = serde_json::from_value(json!({
            "action": "click",
            "selector": "#go"
        }))
        .unwrap();
        assert_eq!(
            action,
            Action::Click {
                selector: "#go".to_string(),
                click_count: 1,
                timeout_ms: None
            }
        );

        let wait: Action = serde_json::from_value(json!({
            "action": "wait",
            "until": {"kind": "selector", "selector": ".done", "hidden": true}
        }))
        .unwrap();
        assert_eq!(wait.describe(), "wait for .done to hide");
    }

    #[test]
    fn delay_timeout_covers_delay() {
        let wait = Action::Wait {
            until: WaitCondition::Delay { ms: 45_000 },
            timeout_ms: None,
        };
        assert_eq!(wait.timeout(), Duration::from_millis(46_000));
    }

    #[test]
    fn huge_delays_saturate() {
        let wait = Action::Wait {
            until: WaitCondition::Delay { ms: u64::MAX },
            timeout_ms: Some(5_000),
        };
        assert_eq!(wait.timeout(), Duration::from_millis(u64::MAX));

        let hold = Action::HoldKey {
            key: "Shift".to_string(),
            duration_ms: u64::MAX - 10,
        };
        assert_eq!(hold.timeout(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn held_keys_outlast_their_duration() {
        let hold = Action::HoldKey {
            key: "Shift".to_string(),
            duration_ms: 40_000,
        };
        assert_eq!(hold.timeout(), Duration::from_millis(41_000));
        assert_eq!(hold.describe(), "hold Shift for 40000ms");
    }

    #[test]
    fn urls_get_a_scheme() {
        assert_eq!(normalize_url("example.com"), "https://example.com");
        assert_eq!(normalize_url("http://a.b"), "http://a.b");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }
}
