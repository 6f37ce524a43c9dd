//! The daemon core: request forwarding, reply routing, fault handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use surf_types::protocol::{ToolRequest, ToolResponse, WireMessage};
use surf_types::{BridgeConfig, BridgeError, RequestId};

use crate::lanes::SiteLanes;
use crate::registry::{Pending, RequestRegistry};
use crate::upstream::Upstream;

/// Why the daemon process should exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Another instance took over the socket path (normal after a native
    /// pipe restart). Exit 0.
    Replaced,
    /// The pipe produced an unrecoverable framing error. Exit non-zero.
    ProtocolError(String),
}

/// Shared daemon state. One per process, behind an `Arc`.
pub struct Bridge {
    config: BridgeConfig,
    pub(crate) registry: RequestRegistry,
    lanes: SiteLanes,
    pub(crate) upstream: Upstream,
    /// Outbound line queues per live client connection.
    conns: Mutex<HashMap<u64, mpsc::UnboundedSender<String>>>,
    next_conn: AtomicU64,
    sweeper_started: AtomicBool,
    exit_tx: watch::Sender<Option<ExitReason>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let (exit_tx, _) = watch::channel(None);
        Arc::new(Self {
            registry: RequestRegistry::new(config.id_prefix.clone()),
            lanes: SiteLanes::new(),
            upstream: Upstream::new(),
            conns: Mutex::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
            sweeper_started: AtomicBool::new(false),
            exit_tx,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Subscribe to the exit signal.
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitReason>> {
        self.exit_tx.subscribe()
    }

    pub(crate) fn signal_exit(&self, reason: ExitReason) {
        let _ = self.exit_tx.send(Some(reason));
    }

    // -----------------------------------------------------------------------
    // Upstream pipe
    // -----------------------------------------------------------------------

    /// Attach the native pipe and start its reader/writer tasks.
    ///
    /// Called once at startup with stdio; tests attach duplex pipes.
    pub fn attach_upstream<R, W>(self: &Arc<Self>, mut reader: R, mut writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();
        self.upstream.set(Some(tx));
        self.spawn_sweeper();
        info!("native pipe attached");

        // Writer: the queue is the serialisation point; frames never
        // interleave because only this task writes.
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = surf_codec::write_json(&mut writer, &msg).await {
                    warn!(error = %e, "native pipe write failed");
                    bridge.on_upstream_closed(None);
                    break;
                }
            }
        });

        // Reader: single owner of the inbound half.
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match surf_codec::read_json::<_, WireMessage>(&mut reader).await {
                    Ok(Some(WireMessage::ToolResponse(resp))) => bridge.deliver_reply(resp),
                    Ok(Some(other)) => {
                        debug!(?other, "ignoring non-response message from the pipe")
                    }
                    Ok(None) => {
                        info!("native pipe EOF");
                        bridge.on_upstream_closed(None);
                        break;
                    }
                    Err(surf_codec::CodecError::Json(e)) => {
                        // A well-framed but malformed payload: drop the
                        // message, keep the pipe.
                        warn!(error = %e, "dropping malformed frame payload");
                    }
                    Err(e) => {
                        warn!(error = %e, "native pipe framing error");
                        bridge.on_upstream_closed(Some(e.to_string()));
                        break;
                    }
                }
            }
        });
    }

    /// Abort everything in flight; optionally escalate to process exit.
    pub(crate) fn on_upstream_closed(&self, protocol_error: Option<String>) {
        self.upstream.set(None);
        let aborted = self.registry.drain();
        if !aborted.is_empty() {
            warn!(count = aborted.len(), "aborting in-flight requests: native host disconnected");
        }
        let err = BridgeError::transport("native host disconnected");
        for (_, pending) in aborted {
            self.reply_failure(pending.conn_id, pending.original_id, &err);
        }
        if let Some(detail) = protocol_error {
            self.signal_exit(ExitReason::ProtocolError(detail));
        }
    }

    // -----------------------------------------------------------------------
    // Client connections
    // -----------------------------------------------------------------------

    /// Register a new client connection; returns its id and outbound queue.
    pub(crate) fn register_conn(&self) -> (u64, mpsc::UnboundedReceiver<String>) {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns
            .lock()
            .expect("conns lock poisoned")
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Tear down a connection: late replies for it are discarded silently.
    pub(crate) fn drop_conn(&self, conn_id: u64) {
        self.conns
            .lock()
            .expect("conns lock poisoned")
            .remove(&conn_id);
        let purged = self.registry.purge_conn(conn_id);
        if purged > 0 {
            debug!(conn_id, purged, "purged pending requests for closed connection");
        }
    }

    /// Queue a line for a connection. False when the connection is gone.
    pub(crate) fn send_line(&self, conn_id: u64, line: String) -> bool {
        let conns = self.conns.lock().expect("conns lock poisoned");
        match conns.get(&conn_id) {
            Some(tx) => tx.send(line).is_ok(),
            None => false,
        }
    }

    fn send_message(&self, conn_id: u64, msg: &WireMessage) -> bool {
        match serde_json::to_string(msg) {
            Ok(line) => self.send_line(conn_id, line),
            Err(e) => {
                warn!(error = %e, "failed to serialize outbound message");
                false
            }
        }
    }

    fn reply_failure(&self, conn_id: u64, id: RequestId, err: &BridgeError) {
        let resp = ToolResponse::failure(id, err);
        self.send_message(conn_id, &WireMessage::ToolResponse(resp));
    }

    // -----------------------------------------------------------------------
    // Request path
    // -----------------------------------------------------------------------

    /// Forward one client request upstream and wait out its lifetime.
    ///
    /// Holding the lane guard across the `done` await is what serialises a
    /// whole AI-site conversation, not just the forwarding instant.
    pub(crate) async fn handle_request(self: Arc<Self>, conn_id: u64, req: ToolRequest) {
        let tool = req.params.tool.clone();

        let _lane = match SiteLanes::site_key(&tool) {
            Some(site) => Some(self.lanes.acquire(site).await),
            None => None,
        };

        let upstream_id = self.registry.next_id();
        let (done_tx, done_rx) = oneshot::channel();
        let pending = Pending {
            conn_id,
            original_id: req.id.clone(),
            tool: tool.clone(),
            deadline: Instant::now() + self.config.timeout_for(&tool),
            done_tx: Some(done_tx),
        };

        if let Err(e) = self.registry.insert(upstream_id.clone(), pending) {
            self.reply_failure(conn_id, req.id, &e);
            return;
        }

        debug!(tool = %tool, client_id = %req.id, upstream_id = %upstream_id, "forwarding request");
        let mut forwarded = req;
        forwarded.id = upstream_id.clone();
        if let Err(e) = self.upstream.send(WireMessage::ToolRequest(forwarded)) {
            // Never forwarded: clean up and fail the request ourselves.
            if let Some(pending) = self.registry.take(&upstream_id) {
                self.reply_failure(pending.conn_id, pending.original_id, &e);
            }
            return;
        }

        // Resolves on reply delivery, timeout, connection purge, or drain.
        let _ = done_rx.await;
    }

    /// Route a reply from the pipe back to its client.
    pub(crate) fn deliver_reply(&self, resp: ToolResponse) {
        let Some(mut pending) = self.registry.take(&resp.id) else {
            debug!(id = %resp.id, "dropping late or unknown reply");
            return;
        };
        let restored = resp.with_id(pending.original_id.clone());
        if !self.send_message(pending.conn_id, &WireMessage::ToolResponse(restored)) {
            debug!(conn_id = pending.conn_id, "reply for a closed connection dropped");
        }
        if let Some(done) = pending.done_tx.take() {
            let _ = done.send(());
        }
    }

    // -----------------------------------------------------------------------
    // Deadlines
    // -----------------------------------------------------------------------

    /// Start the timeout sweeper (idempotent).
    pub(crate) fn spawn_sweeper(self: &Arc<Self>) {
        if self.sweeper_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(250));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                for (upstream_id, mut pending) in bridge.registry.expire_due(Instant::now()) {
                    warn!(
                        tool = %pending.tool,
                        upstream_id = %upstream_id,
                        "request deadline expired"
                    );
                    let err = BridgeError::timeout(format!(
                        "tool '{}' produced no reply before the deadline",
                        pending.tool
                    ));
                    bridge.reply_failure(pending.conn_id, pending.original_id.clone(), &err);
                    if let Some(done) = pending.done_tx.take() {
                        let _ = done.send(());
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use surf_types::protocol::UpstreamState;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            request_timeout_ms: 200,
            ..BridgeConfig::default()
        }
    }

    /// Attach a duplex pipe as the upstream; returns the far (router) end.
    fn attach_fake_pipe(bridge: &Arc<Bridge>) -> tokio::io::DuplexStream {
        let (daemon_side, router_side) = tokio::io::duplex(256 * 1024);
        let (read_half, write_half) = tokio::io::split(daemon_side);
        bridge.attach_upstream(read_half, write_half);
        router_side
    }

    #[tokio::test]
    async fn request_is_rewritten_and_reply_restored() {
        let bridge = Bridge::new(test_config());
        let far = attach_fake_pipe(&bridge);
        let (mut far_read, mut far_write) = tokio::io::split(far);

        let (conn_id, mut out_rx) = bridge.register_conn();
        let req = ToolRequest::new("a1", "navigate", json!({"url": "https://example.org"}));
        tokio::spawn(Arc::clone(&bridge).handle_request(conn_id, req));

        // The router end sees the rewritten id.
        let WireMessage::ToolRequest(seen) =
            surf_codec::read_json(&mut far_read).await.unwrap().unwrap()
        else {
            panic!("expected a forwarded request");
        };
        assert!(seen.id.as_str().starts_with("surf-"));
        assert_eq!(seen.params.tool, "navigate");

        // Reply with the upstream id; the client sees its own id back.
        let reply = ToolResponse::text(seen.id.clone(), "ok");
        surf_codec::write_json(&mut far_write, &WireMessage::ToolResponse(reply))
            .await
            .unwrap();

        let line = out_rx.recv().await.unwrap();
        let WireMessage::ToolResponse(resp) = serde_json::from_str(&line).unwrap() else {
            panic!("expected a reply line");
        };
        assert_eq!(resp.id, "a1");
        assert_eq!(resp.first_text(), Some("ok"));
    }

    #[tokio::test]
    async fn disconnected_upstream_fails_fast() {
        let bridge = Bridge::new(test_config());
        let (conn_id, mut out_rx) = bridge.register_conn();
        let req = ToolRequest::new("a1", "page.text", json!({}));
        Arc::clone(&bridge).handle_request(conn_id, req).await;

        let line = out_rx.recv().await.unwrap();
        let WireMessage::ToolResponse(resp) = serde_json::from_str(&line).unwrap() else {
            panic!("expected a reply line");
        };
        assert!(resp.is_error());
        assert!(resp.first_text().unwrap().contains("[transport]"));
        assert_eq!(resp.id, "a1");
    }

    #[tokio::test]
    async fn timeout_synthesises_reply_and_discards_late_answer() {
        let bridge = Bridge::new(test_config());
        let far = attach_fake_pipe(&bridge);
        let (mut far_read, mut far_write) = tokio::io::split(far);

        let (conn_id, mut out_rx) = bridge.register_conn();
        let req = ToolRequest::new("slow", "page.read", json!({}));
        tokio::spawn(Arc::clone(&bridge).handle_request(conn_id, req));

        let WireMessage::ToolRequest(seen) =
            surf_codec::read_json(&mut far_read).await.unwrap().unwrap()
        else {
            panic!("expected a forwarded request");
        };

        // Say nothing until the 200 ms deadline passes.
        let line = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
            .await
            .expect("timeout reply not delivered")
            .unwrap();
        let WireMessage::ToolResponse(resp) = serde_json::from_str(&line).unwrap() else {
            panic!("expected a reply line");
        };
        assert!(resp.first_text().unwrap().contains("[timeout]"));
        assert_eq!(resp.id, "slow");

        // A very late reply must be swallowed, not delivered twice.
        let late = ToolResponse::text(seen.id, "too late");
        surf_codec::write_json(&mut far_write, &WireMessage::ToolResponse(late))
            .await
            .unwrap();
        let extra = tokio::time::timeout(Duration::from_millis(200), out_rx.recv()).await;
        assert!(extra.is_err(), "late reply must not reach the client");
    }

    #[tokio::test]
    async fn upstream_eof_aborts_in_flight() {
        let bridge = Bridge::new(test_config());
        let far = attach_fake_pipe(&bridge);
        let (mut far_read, far_write) = tokio::io::split(far);

        let (conn_id, mut out_rx) = bridge.register_conn();
        let req = ToolRequest::new("a1", "navigate", json!({}));
        tokio::spawn(Arc::clone(&bridge).handle_request(conn_id, req));
        // Wait until the request is actually on the pipe, then sever it.
        let _ = surf_codec::read_json::<_, WireMessage>(&mut far_read).await;
        drop(far_read);
        drop(far_write);

        let line = tokio::time::timeout(Duration::from_secs(1), out_rx.recv())
            .await
            .expect("abort reply not delivered")
            .unwrap();
        assert!(line.contains("[transport]"));
        assert!(line.contains("native host disconnected"));
        assert_eq!(bridge.upstream.state(), UpstreamState::Disconnected);
    }

    #[tokio::test]
    async fn duplicate_in_flight_id_rejected() {
        let bridge = Bridge::new(test_config());
        let far = attach_fake_pipe(&bridge);
        let (mut far_read, _far_write) = tokio::io::split(far);

        let (conn_id, mut out_rx) = bridge.register_conn();
        let first = ToolRequest::new("x", "page.read", json!({}));
        tokio::spawn(Arc::clone(&bridge).handle_request(conn_id, first));
        let _ = surf_codec::read_json::<_, WireMessage>(&mut far_read).await;

        let second = ToolRequest::new("x", "page.read", json!({}));
        Arc::clone(&bridge).handle_request(conn_id, second).await;

        let line = out_rx.recv().await.unwrap();
        assert!(line.contains("[protocol]"), "got: {line}");
        assert!(line.contains("already in flight"));
    }

    #[tokio::test]
    async fn replies_for_closed_connections_are_dropped() {
        let bridge = Bridge::new(test_config());
        let far = attach_fake_pipe(&bridge);
        let (mut far_read, mut far_write) = tokio::io::split(far);

        let (conn_id, out_rx) = bridge.register_conn();
        let req = ToolRequest::new("a1", "navigate", json!({}));
        tokio::spawn(Arc::clone(&bridge).handle_request(conn_id, req));

        let WireMessage::ToolRequest(seen) =
            surf_codec::read_json(&mut far_read).await.unwrap().unwrap()
        else {
            panic!("expected a forwarded request");
        };

        drop(out_rx);
        bridge.drop_conn(conn_id);

        // The reply finds no pending entry and vanishes without a panic.
        let reply = ToolResponse::text(seen.id, "nobody home");
        surf_codec::write_json(&mut far_write, &WireMessage::ToolResponse(reply))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(bridge.registry.in_flight(), 0);
    }
}
