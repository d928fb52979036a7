//! Remote browser abstraction.
//!
//! A run talks to exactly one [`Browser`] obtained from a [`Connector`]. The
//! production implementation drives Chrome over the DevTools Protocol
//! (see [`cdp`]); tests substitute a scripted page.

pub mod cdp;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use cdp::CdpConnector;

/// What to read from matched elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractKind {
    Text,
    Html,
    Attribute(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrowserError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Browser connection closed")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// One attached page of a remote browser.
///
/// Calls are not interruptible; once [`Browser::close`] has run every further
/// call fails with [`BrowserError::Disconnected`].
#[async_trait]
pub trait Browser: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;
    /// Reload the current document and wait for it to finish loading.
    async fn reload(&self) -> Result<(), BrowserError>;
    async fn click(&self, selector: &str, click_count: u32) -> Result<(), BrowserError>;
    /// Single left click while `modifiers` (e.g. `Shift`, `Control`) are held.
    async fn click_with_modifiers(&self, selector: &str, modifiers: &[String]) -> Result<(), BrowserError>;
    /// Move the pointer to viewport coordinates.
    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), BrowserError>;
    /// Press the left button at `from`, move to `to` and release there.
    async fn drag(&self, from: (f64, f64), to: (f64, f64)) -> Result<(), BrowserError>;
    async fn hover(&self, selector: &str) -> Result<(), BrowserError>;
    async fn focus(&self, selector: &str) -> Result<(), BrowserError>;
    /// Insert text into whatever currently has focus.
    async fn insert_text(&self, text: &str) -> Result<(), BrowserError>;
    /// Key name or `+`-joined combination, e.g. `Enter` or `Control+a`.
    async fn press_key(&self, key: &str) -> Result<(), BrowserError>;
    async fn key_down(&self, key: &str) -> Result<(), BrowserError>;
    async fn key_up(&self, key: &str) -> Result<(), BrowserError>;
    async fn scroll(&self, selector: Option<&str>, x: f64, y: f64) -> Result<(), BrowserError>;
    /// Values of every element matching `selector`, in document order.
    async fn extract(&self, selector: &str, kind: &ExtractKind) -> Result<Vec<Value>, BrowserError>;
    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError>;
    async fn wait_for_selector(&self, selector: &str, hidden: bool, timeout: Duration) -> Result<(), BrowserError>;
    async fn wait_for_load(&self, timeout: Duration) -> Result<(), BrowserError>;
    /// PNG bytes of the visible viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;
    async fn url(&self) -> Result<String, BrowserError>;
    async fn title(&self) -> Result<String, BrowserError>;
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Opens a [`Browser`] for an opaque endpoint supplied by the browser launcher.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Browser>, BrowserError>;
}
