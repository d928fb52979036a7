//! Chrome DevTools Protocol implementation of the browser layer.

pub mod client;
pub mod page;
pub mod protocol;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use self::client::CdpClient;
use self::page::CdpPage;
use self::protocol::{BrowserVersion, TargetInfo};
use crate::browser::{Browser, BrowserError, Connector};

/// Connects to a remotely debuggable Chrome.
///
/// Accepts either a `ws://` debugger URL or the `http://host:port` of the
/// DevTools HTTP endpoint.
#[derive(Clone, Default)]
pub struct CdpConnector {
    http: reqwest::Client,
}

impl CdpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn resolve_ws_url(&self, endpoint: &str) -> Result<String, BrowserError> {
        let parsed = url::Url::parse(endpoint)
            .map_err(|e| BrowserError::Protocol(format!("Invalid endpoint {}: {}", endpoint, e)))?;

        match parsed.scheme() {
            "ws" | "wss" => Ok(endpoint.to_string()),
            "http" | "https" => {
                let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
                debug!("Fetching browser version from {}", version_url);
                let version: BrowserVersion = self
                    .http
                    .get(&version_url)
                    .send()
                    .await
                    .map_err(|e| BrowserError::Protocol(format!("{}: {}", endpoint, e)))?
                    .json()
                    .await
                    .map_err(|e| BrowserError::Protocol(format!("{}: {}", endpoint, e)))?;
                debug!("Discovered browser: {}", version.browser);
                Ok(version.web_socket_debugger_url)
            }
            other => Err(BrowserError::Protocol(format!("Unsupported scheme: {}", other))),
        }
    }

    async fn attach(client: CdpClient) -> Result<CdpPage, BrowserError> {
        let targets = client.call("Target.getTargets", None, None).await?;
        let pages: Vec<TargetInfo> = serde_json::from_value(targets["targetInfos"].clone())
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;

        let target_id = match pages.into_iter().find(|t| t.target_type == "page") {
            Some(page) => page.target_id,
            None => {
                let created = client
                    .call("Target.createTarget", Some(json!({"url": "about:blank"})), None)
                    .await?;
                created["targetId"]
                    .as_str()
                    .ok_or_else(|| BrowserError::Protocol("Missing targetId".to_string()))?
                    .to_string()
            }
        };

        let attached = client
            .call(
                "Target.attachToTarget",
                Some(json!({"targetId": target_id, "flatten": true})),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Protocol("Missing sessionId".to_string()))?
            .to_string();

        Ok(CdpPage::new(client, target_id, session_id))
    }
}

#[async_trait]
impl Connector for CdpConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Browser>, BrowserError> {
        let ws_url = self.resolve_ws_url(endpoint).await?;
        let client = CdpClient::connect(&ws_url).await?;
        let page = Self::attach(client).await?;
        if let Err(e) = page.enable_domains().await {
            let _ = page.close().await;
            return Err(e);
        }
        info!(endpoint = %endpoint, target_id = %page.target_id(), "Attached to browser page");
        Ok(Box::new(page))
    }
}
