//! Per-tab network capture feeding the netlog store.
//!
//! Capture runs independently of tool traffic: a background task follows the
//! session's Network events, pairs requests with responses, streams bodies
//! into the content-addressed store, and appends one entry per exchange.
//! The per-tab state machine (`off -> starting -> on -> stopping -> off`) guards
//! against parallel transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::oneshot;

use surf_netlog::{BodyKind, NetworkEntry, NetworkStore};

use crate::cdp::CdpClient;
use crate::error::RouterError;

/// Capture lifecycle for one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Off,
    Starting,
    On,
    Stopping,
}

/// The state machine cell stored on each tab session.
pub struct CaptureSlot {
    state: Mutex<CaptureState>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl Default for CaptureSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CaptureState::Off),
            stop: Mutex::new(None),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock().expect("capture state lock poisoned")
    }

    /// `off -> starting`; anything else is an illegal transition.
    pub fn begin_start(&self) -> Result<(), RouterError> {
        let mut state = self.state.lock().expect("capture state lock poisoned");
        match *state {
            CaptureState::Off => {
                *state = CaptureState::Starting;
                Ok(())
            }
            other => Err(RouterError::CaptureState {
                detail: format!("cannot start capture while {other:?}"),
            }),
        }
    }

    /// `starting -> on`, storing the task's stop handle.
    pub fn confirm_on(&self, stop: oneshot::Sender<()>) {
        *self.state.lock().expect("capture state lock poisoned") = CaptureState::On;
        *self.stop.lock().expect("capture stop lock poisoned") = Some(stop);
    }

    /// `starting -> off` after a failed start.
    pub fn abort_start(&self) {
        *self.state.lock().expect("capture state lock poisoned") = CaptureState::Off;
    }

    /// `on -> stopping`; returns the stop handle for the task.
    pub fn begin_stop(&self) -> Result<oneshot::Sender<()>, RouterError> {
        let mut state = self.state.lock().expect("capture state lock poisoned");
        match *state {
            CaptureState::On => {
                *state = CaptureState::Stopping;
                let stop = self
                    .stop
                    .lock()
                    .expect("capture stop lock poisoned")
                    .take()
                    .ok_or_else(|| RouterError::CaptureState {
                        detail: "capture is on but has no stop handle".to_string(),
                    })?;
                Ok(stop)
            }
            other => Err(RouterError::CaptureState {
                detail: format!("cannot stop capture while {other:?}"),
            }),
        }
    }

    /// `stopping -> off`.
    pub fn confirm_off(&self) {
        *self.state.lock().expect("capture state lock poisoned") = CaptureState::Off;
    }
}

/// One request/response pair being assembled from events.
#[derive(Debug, Default)]
struct PendingExchange {
    url: String,
    method: String,
    request_headers: HashMap<String, String>,
    post_data: Option<String>,
    status: u16,
    response_headers: HashMap<String, String>,
    content_type: Option<String>,
}

/// Begin capturing on an attached session.
pub async fn start_capture(
    store: NetworkStore,
    slot: &CaptureSlot,
    client: Arc<CdpClient>,
) -> Result<(), RouterError> {
    slot.begin_start()?;
    if let Err(e) = client.enable_domain("Network").await {
        slot.abort_start();
        return Err(e);
    }

    let events = client.subscribe();
    let (stop_tx, stop_rx) = oneshot::channel();
    tokio::spawn(capture_loop(store, client, events, stop_rx));
    slot.confirm_on(stop_tx);
    Ok(())
}

/// Stop capturing on an attached session.
pub async fn stop_capture(slot: &CaptureSlot, client: &CdpClient) -> Result<(), RouterError> {
    let stop = slot.begin_stop()?;
    let _ = stop.send(());
    // Best effort; the tab may already be gone.
    if let Err(e) = client.send_command("Network.disable", json!({})).await {
        tracing::debug!(error = %e, "Network.disable failed during capture stop");
    }
    slot.confirm_off();
    Ok(())
}

async fn capture_loop(
    store: NetworkStore,
    client: Arc<CdpClient>,
    mut events: tokio::sync::broadcast::Receiver<crate::cdp::CdpEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut pending: HashMap<String, PendingExchange> = HashMap::new();
    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            event = events.recv() => {
                let event = match event {
                    Ok(ev) => ev,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "capture lagged behind network events");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                handle_event(&store, &client, &mut pending, event).await;
            }
        }
    }
    tracing::debug!("capture loop finished");
}

async fn handle_event(
    store: &NetworkStore,
    client: &CdpClient,
    pending: &mut HashMap<String, PendingExchange>,
    event: crate::cdp::CdpEvent,
) {
    let Some(request_id) = event
        .params
        .get("requestId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
    else {
        return;
    };

    match event.method.as_str() {
        "Network.requestWillBeSent" => {
            let Some(request) = event.params.get("request") else {
                return;
            };
            let exchange = pending.entry(request_id).or_default();
            exchange.url = request
                .get("url")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            exchange.method = request
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or("GET")
                .to_string();
            exchange.request_headers = header_map(request.get("headers"));
            exchange.post_data = request
                .get("postData")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        }
        "Network.responseReceived" => {
            let Some(response) = event.params.get("response") else {
                return;
            };
            let exchange = pending.entry(request_id).or_default();
            exchange.status = response.get("status").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
            exchange.response_headers = header_map(response.get("headers"));
            exchange.content_type = response
                .get("mimeType")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
        }
        "Network.loadingFinished" => {
            let Some(exchange) = pending.remove(&request_id) else {
                return;
            };
            if exchange.url.is_empty() {
                return;
            }
            let body = fetch_response_body(client, &request_id).await;
            if let Err(e) = record_exchange(store, exchange, body) {
                tracing::warn!(error = %e, "failed to record captured exchange");
            }
            if let Err(e) = store.maybe_cleanup() {
                tracing::warn!(error = %e, "capture auto-cleanup failed");
            }
        }
        "Network.loadingFailed" => {
            pending.remove(&request_id);
        }
        _ => {}
    }
}

/// Pull the response body, decoding base64 transport encoding.
async fn fetch_response_body(client: &CdpClient, request_id: &str) -> Option<Vec<u8>> {
    let result = client
        .send_command("Network.getResponseBody", json!({ "requestId": request_id }))
        .await
        .ok()?;
    let body = result.get("body").and_then(|v| v.as_str())?;
    let encoded = result
        .get("base64Encoded")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if encoded {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.decode(body).ok()
    } else {
        Some(body.as_bytes().to_vec())
    }
}

/// Hash bodies into the store and append the entry.
fn record_exchange(
    store: &NetworkStore,
    exchange: PendingExchange,
    response_body: Option<Vec<u8>>,
) -> Result<(), RouterError> {
    let mut entry = NetworkEntry::new(exchange.url, exchange.method, exchange.status);
    entry.content_type = exchange.content_type;
    entry.request_headers = exchange.request_headers;
    entry.response_headers = exchange.response_headers;

    if let Some(post) = exchange.post_data {
        if !post.is_empty() {
            entry.request_body_hash = Some(store.store_body(BodyKind::Request, post.as_bytes())?);
        }
    }
    if let Some(body) = response_body {
        if !body.is_empty() {
            entry.response_body_hash = Some(store.store_body(BodyKind::Response, &body)?);
        }
    }

    store.append(&entry)?;
    Ok(())
}

/// Flatten a DevTools headers object into a string map.
fn header_map(value: Option<&Value>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(Value::Object(obj)) = value {
        for (k, v) in obj {
            if let Some(s) = v.as_str() {
                map.insert(k.clone(), s.to_string());
            }
        }
    }
    map
}
