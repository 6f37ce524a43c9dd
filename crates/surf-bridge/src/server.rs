//! Local-socket acceptor and per-connection sessions.
//!
//! One JSON object per LF-terminated line, full duplex, any number of
//! requests in flight per connection. Binding handles the
//! address-already-in-use case with a short self-describing ping probe:
//! a live bus with a live upstream wins; anything else is a stale file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use surf_types::protocol::{PongReply, UpstreamState, WireMessage};

use crate::bridge::{Bridge, ExitReason};
use crate::client::probe;

/// Budget for deciding whether an existing socket is alive.
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);
/// How often the daemon checks that the socket path is still its own.
const IDENTITY_POLL: Duration = Duration::from_secs(2);

/// Socket bind failures.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// A live bus with a live upstream already owns the path.
    #[error("another bridge instance owns {}", path.display())]
    AlreadyRunning { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The daemon's socket server.
pub struct BridgeServer {
    bridge: Arc<Bridge>,
    listener: UnixListener,
    path: PathBuf,
    /// (dev, ino) of the socket file at bind time; a change means a
    /// successor instance took over.
    identity: Option<(u64, u64)>,
}

impl BridgeServer {
    /// Probe-and-bind on the configured socket path.
    pub async fn bind(bridge: Arc<Bridge>) -> Result<Self, BindError> {
        let path = bridge.config().socket_path.clone();

        if path.exists() {
            match probe(&path, PROBE_TIMEOUT).await {
                Some(pong)
                    if pong.service == "surf-bridge"
                        && pong.upstream == UpstreamState::Connected =>
                {
                    return Err(BindError::AlreadyRunning { path });
                }
                Some(_) => {
                    info!(path = %path.display(), "taking over upstream-dead bus");
                    std::fs::remove_file(&path)?;
                }
                None => {
                    info!(path = %path.display(), "unlinking unresponsive socket");
                    std::fs::remove_file(&path)?;
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&path)?;
        let identity = socket_identity(&path);
        info!(path = %path.display(), "bridge socket listening");

        Ok(Self {
            bridge,
            listener,
            path,
            identity,
        })
    }

    /// Accept clients until an exit is signalled; returns the reason.
    pub async fn run(self) -> ExitReason {
        self.bridge.spawn_sweeper();
        self.spawn_identity_watchdog();

        let mut exit_rx = self.bridge.exit_watch();
        loop {
            tokio::select! {
                changed = exit_rx.changed() => {
                    if changed.is_err() {
                        return ExitReason::Replaced;
                    }
                    let reason = exit_rx.borrow().clone();
                    if let Some(reason) = reason {
                        if reason != ExitReason::Replaced {
                            // Still our file; clean it up on the way out.
                            if socket_identity(&self.path) == self.identity {
                                let _ = std::fs::remove_file(&self.path);
                            }
                        }
                        info!(?reason, "bridge server stopping");
                        return reason;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let bridge = Arc::clone(&self.bridge);
                            tokio::spawn(handle_connection(bridge, stream));
                        }
                        Err(e) => warn!(error = %e, "socket accept error"),
                    }
                }
            }
        }
    }

    /// Exit once a successor re-binds our socket path.
    fn spawn_identity_watchdog(&self) {
        let bridge = Arc::clone(&self.bridge);
        let path = self.path.clone();
        let identity = self.identity;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(IDENTITY_POLL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if socket_identity(&path) != identity {
                    info!(path = %path.display(), "socket path re-bound by a successor");
                    bridge.signal_exit(ExitReason::Replaced);
                    return;
                }
            }
        });
    }
}

/// Handle one client connection until it closes.
async fn handle_connection(bridge: Arc<Bridge>, stream: UnixStream) {
    let (conn_id, mut out_rx) = bridge.register_conn();
    debug!(conn_id, "client connected");

    let (read_half, mut write_half) = stream.into_split();

    // Writer: drains the connection's outbound queue.
    let writer = tokio::spawn(async move {
        while let Some(mut line) = out_rx.recv().await {
            line.push('\n');
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(conn_id, error = %e, "client read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<WireMessage>(&line) {
            Ok(WireMessage::ToolRequest(req)) => {
                tokio::spawn(Arc::clone(&bridge).handle_request(conn_id, req));
            }
            Ok(WireMessage::Ping) => {
                let pong = WireMessage::Pong(PongReply::new(bridge.upstream.state()));
                if let Ok(line) = serde_json::to_string(&pong) {
                    bridge.send_line(conn_id, line);
                }
            }
            Ok(other) => debug!(conn_id, ?other, "ignoring unexpected client message"),
            Err(e) => {
                // A single malformed line never takes the daemon down.
                warn!(conn_id, error = %e, "dropping malformed client line");
            }
        }
    }

    bridge.drop_conn(conn_id);
    writer.abort();
    debug!(conn_id, "client disconnected");
}

/// (dev, ino) of a path, when it exists.
fn socket_identity(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use surf_types::protocol::ToolRequest;
    use surf_types::BridgeConfig;

    fn config_with_socket(dir: &tempfile::TempDir) -> BridgeConfig {
        BridgeConfig {
            socket_path: dir.path().join("surf.sock"),
            ..BridgeConfig::default()
        }
    }

    async fn start_server(bridge: Arc<Bridge>) -> PathBuf {
        let path = bridge.config().socket_path.clone();
        let server = BridgeServer::bind(bridge).await.unwrap();
        tokio::spawn(server.run());
        path
    }

    #[tokio::test]
    async fn ping_answers_with_upstream_state() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config_with_socket(&dir));
        let path = start_server(Arc::clone(&bridge)).await;

        let pong = probe(&path, Duration::from_millis(500)).await.unwrap();
        assert_eq!(pong.service, "surf-bridge");
        assert_eq!(pong.upstream, UpstreamState::Disconnected);

        // Attach a pipe and ask again.
        let (daemon_side, _router_side) = tokio::io::duplex(16 * 1024);
        let (r, w) = tokio::io::split(daemon_side);
        bridge.attach_upstream(r, w);
        let pong = probe(&path, Duration::from_millis(500)).await.unwrap();
        assert_eq!(pong.upstream, UpstreamState::Connected);
    }

    #[tokio::test]
    async fn second_instance_with_live_upstream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config_with_socket(&dir));
        let (daemon_side, _router_side) = tokio::io::duplex(16 * 1024);
        let (r, w) = tokio::io::split(daemon_side);
        bridge.attach_upstream(r, w);
        let _path = start_server(Arc::clone(&bridge)).await;

        let second = Bridge::new(config_with_socket(&dir));
        let err = BridgeServer::bind(second).await.unwrap_err();
        assert!(matches!(err, BindError::AlreadyRunning { .. }));
    }

    #[tokio::test]
    async fn upstream_dead_bus_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config_with_socket(&dir));
        // No upstream attached: the pong advertises a dead pipe.
        let _path = start_server(Arc::clone(&bridge)).await;

        let successor = Bridge::new(config_with_socket(&dir));
        let server = BridgeServer::bind(successor).await.unwrap();
        tokio::spawn(server.run());

        // The displaced instance notices within the poll interval.
        let mut exit_rx = bridge.exit_watch();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if exit_rx.borrow().clone() == Some(ExitReason::Replaced) {
                    break;
                }
                exit_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("displaced daemon never signalled exit");
    }

    #[tokio::test]
    async fn stale_unresponsive_socket_is_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with_socket(&dir);
        // A leftover file nobody answers on.
        std::fs::write(&config.socket_path, b"").unwrap();

        let bridge = Bridge::new(config);
        let server = BridgeServer::bind(bridge).await;
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn malformed_line_does_not_kill_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config_with_socket(&dir));
        let path = start_server(bridge).await;

        let mut stream = UnixStream::connect(&path).await.unwrap();
        stream.write_all(b"this is not json\n").await.unwrap();
        stream
            .write_all(b"{\"type\":\"ping\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(stream).lines();
        let line = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(line.contains("pong"));
    }

    #[tokio::test]
    async fn requests_without_upstream_get_transport_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = Bridge::new(config_with_socket(&dir));
        let path = start_server(bridge).await;

        let stream = UnixStream::connect(&path).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let req = ToolRequest::new("a1", "navigate", json!({"url": "https://example.org"}));
        let mut line = serde_json::to_string(&WireMessage::ToolRequest(req)).unwrap();
        line.push('\n');
        write_half.write_all(line.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(read_half).lines();
        let reply = tokio::time::timeout(Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let WireMessage::ToolResponse(resp) = serde_json::from_str::<WireMessage>(&reply).unwrap()
        else {
            panic!("expected a tool response");
        };
        assert!(resp.is_error());
        assert_eq!(resp.id, "a1");
        let text = resp.first_text().unwrap();
        assert!(text.contains("[transport]"));
    }

    #[test]
    fn socket_identity_none_for_missing_path() {
        assert_eq!(socket_identity(Path::new("/nonexistent/surf.sock")), None);
    }
}
