//! Low-level DevTools WebSocket client.
//!
//! JSON-RPC command/response correlation with broadcast event fan-out: the
//! network-capture task and any number of wait handlers can follow the same
//! session's events independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::RouterError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Default per-command deadline.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Event fan-out buffer; a slow subscriber drops events, never commands.
const EVENT_BUFFER: usize = 1024;

/// A DevTools event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// The event method name (e.g. "Page.loadEventFired").
    pub method: String,
    pub params: Value,
}

#[derive(Debug, Clone, serde::Serialize)]
struct CdpCommand {
    id: u64,
    method: String,
    params: Value,
}

/// A command response from the browser.
#[derive(Debug, Clone)]
struct CdpResponse {
    result: Option<Value>,
    error: Option<CdpResponseError>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct CdpResponseError {
    code: i64,
    message: String,
}

/// One WebSocket session against a DevTools target.
///
/// Commands carry auto-incrementing ids and responses are correlated back
/// to the caller; events go to every subscriber.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>,
    writer: Arc<Mutex<WsSink>>,
    events: broadcast::Sender<CdpEvent>,
    alive: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint
    /// (`ws://127.0.0.1:{port}/devtools/page/{target}`).
    pub async fn connect(ws_url: &str) -> Result<Self, RouterError> {
        tracing::debug!(url = ws_url, "connecting DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| RouterError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            })?;

        let (writer, reader) = ws_stream.split();
        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let alive = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(Self::read_loop(
            reader,
            Arc::clone(&pending),
            events.clone(),
            Arc::clone(&alive),
        ));

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Arc::new(Mutex::new(writer)),
            events,
            alive,
            _reader_handle: reader_handle,
        })
    }

    /// Whether the session's socket is still up.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Follow this session's events.
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Send a command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, RouterError> {
        self.send_command_with_timeout(method, params, COMMAND_TIMEOUT)
            .await
    }

    /// Send a command with a custom deadline.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RouterError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cmd = CdpCommand {
            id,
            method: method.to_string(),
            params,
        };
        let json = serde_json::to_string(&cmd).map_err(|e| RouterError::Protocol {
            detail: format!("failed to serialize command: {e}"),
        })?;

        // Register before sending so a fast response cannot race the map.
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        {
            let mut writer = self.writer.lock().await;
            writer
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| RouterError::Protocol {
                    detail: format!("failed to send WebSocket message: {e}"),
                })?;
        }

        let response = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| RouterError::CommandTimeout {
                method: method.to_string(),
                duration: timeout,
            })?
            .map_err(|_| RouterError::Protocol {
                detail: "response channel closed unexpectedly".to_string(),
            })?;

        if let Some(err) = response.error {
            return Err(classify_cdp_error(method, err.code, err.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Enable a DevTools domain ("Page", "DOM", "Runtime", "Network", ...).
    pub async fn enable_domain(&self, domain: &str) -> Result<(), RouterError> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Background task: responses resolve pending commands, events fan out.
    async fn read_loop(
        mut reader: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
        pending: Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>,
        events: broadcast::Sender<CdpEvent>,
        alive: Arc<AtomicBool>,
    ) {
        while let Some(msg_result) = reader.next().await {
            let msg = match msg_result {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket read error, stopping session");
                    break;
                }
            };

            let text = match msg {
                Message::Text(t) => t.to_string(),
                Message::Binary(b) => match String::from_utf8(b.to_vec()) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Message::Close(_) => break,
                _ => continue,
            };

            let json: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable DevTools message skipped");
                    continue;
                }
            };

            if let Some(id) = json.get("id").and_then(|v| v.as_u64()) {
                let response = CdpResponse {
                    result: json.get("result").cloned(),
                    error: json
                        .get("error")
                        .and_then(|e| serde_json::from_value(e.clone()).ok()),
                };
                let mut pending_guard = pending.lock().await;
                if let Some(tx) = pending_guard.remove(&id) {
                    let _ = tx.send(response);
                }
            } else if let Some(method) = json.get("method").and_then(|v| v.as_str()) {
                let event = CdpEvent {
                    method: method.to_string(),
                    params: json.get("params").cloned().unwrap_or(Value::Null),
                };
                // No subscribers is fine; the event just evaporates.
                let _ = events.send(event);
            }
        }

        alive.store(false, Ordering::SeqCst);
        // Cancel whatever was still waiting for an answer.
        let mut pending_guard = pending.lock().await;
        for (_, tx) in pending_guard.drain() {
            let _ = tx.send(CdpResponse {
                result: None,
                error: Some(CdpResponseError {
                    code: -1,
                    message: "WebSocket connection closed".to_string(),
                }),
            });
        }
    }
}

/// Map a DevTools error response onto the router taxonomy.
///
/// Attach refusals and restricted targets must classify as capability
/// failures so the fallback policy can engage.
fn classify_cdp_error(method: &str, code: i64, message: String) -> RouterError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("not allowed") || lower.contains("restricted") || lower.contains("denied") {
        return RouterError::Restricted { reason: message };
    }
    if method.starts_with("Target.attach") || lower.contains("attach") {
        return RouterError::AttachRefused { reason: message };
    }
    RouterError::CdpFailure { code, message }
}
