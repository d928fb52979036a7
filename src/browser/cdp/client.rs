//! CDP WebSocket client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use super::protocol::{CdpRequest, CdpResponse};
use crate::browser::BrowserError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, BrowserError>>>>>;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One websocket connection to a browser, multiplexing flattened target sessions.
pub struct CdpClient {
    ws_url: String,
    ws_tx: tokio::sync::Mutex<WsSink>,
    request_id: AtomicU64,
    pending: Pending,
    closed: Arc<AtomicBool>,
    recv_task: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| BrowserError::Protocol(format!("WebSocket: {}", e)))?;

        let (ws_sink, ws_source) = ws_stream.split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let recv_task = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                Self::receive_loop(ws_source, pending.clone()).await;
                closed.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with Disconnected.
                pending.lock().clear();
            })
        };

        debug!("CDP client connected to {}", ws_url);

        Ok(Self {
            ws_url: ws_url.to_string(),
            ws_tx: tokio::sync::Mutex::new(ws_sink),
            request_id: AtomicU64::new(1),
            pending,
            closed,
            recv_task,
        })
    }

    async fn receive_loop(mut ws_source: WsSource, pending: Pending) {
        while let Some(msg) = ws_source.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    trace!("CDP recv: {}", text);
                    let resp = match serde_json::from_str::<CdpResponse>(&text) {
                        Ok(resp) => resp,
                        Err(e) => {
                            warn!("Failed to parse CDP message: {}", e);
                            continue;
                        }
                    };
                    // Events are not consumed; only command responses carry an id.
                    let Some(id) = resp.id else { continue };
                    let Some(tx) = pending.lock().remove(&id) else { continue };
                    let result = match resp.error {
                        Some(err) => Err(BrowserError::Protocol(format!(
                            "{} (code: {})",
                            err.message, err.code
                        ))),
                        None => Ok(resp.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(result);
                }
                Ok(Message::Close(_)) => {
                    debug!("WebSocket closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for its response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        session_id: Option<&str>,
    ) -> Result<Value, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::Disconnected);
        }

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: session_id.map(str::to_string),
        };
        let json = serde_json::to_string(&request)
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        trace!("CDP send: {}", json);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        {
            let mut ws = self.ws_tx.lock().await;
            if let Err(e) = ws.send(Message::Text(json.into())).await {
                self.pending.lock().remove(&id);
                debug!("CDP send failed: {}", e);
                return Err(BrowserError::Disconnected);
            }
        }

        match tokio::time::timeout(CALL_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrowserError::Disconnected),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(BrowserError::Timeout(format!("Request {} timed out", method)))
            }
        }
    }

    /// Close the websocket. Idempotent.
    pub async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.ws_tx.lock().await.close().await;
        self.recv_task.abort();
        self.pending.lock().clear();
        result.map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
