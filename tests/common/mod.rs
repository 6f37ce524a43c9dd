//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use surf::bridge::{Bridge, BridgeClient, BridgeServer};
use surf::router::{RequestHandler, RouterService};
use surf::types::protocol::{ToolRequest, ToolResponse};
use surf::types::{BridgeConfig, BridgeError};

/// A scripted stand-in for the extension router: answers like the real tool
/// vocabulary and records every call.
#[derive(Clone, Default)]
pub struct ScriptedRouter {
    pub calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl ScriptedRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The (tool, args) pairs seen so far.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().expect("calls lock poisoned").clone()
    }

    pub fn calls_for(&self, tool: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(t, _)| t == tool)
            .map(|(_, args)| args)
            .collect()
    }
}

#[async_trait]
impl RequestHandler for ScriptedRouter {
    async fn handle(&self, req: ToolRequest) -> ToolResponse {
        self.calls
            .lock()
            .expect("calls lock poisoned")
            .push((req.params.tool.clone(), req.params.args.clone()));

        match req.params.tool.as_str() {
            "navigate" | "tab.new" | "tab.select" | "back" | "forward" | "reload" => {
                ToolResponse::text(req.id, "ok")
            }
            "page.text" => ToolResponse::text(req.id, "hello from the page"),
            "js.eval" => {
                let expr = req.params.args.get("expr").and_then(|v| v.as_str()).unwrap_or("");
                if expr.contains("document.title") {
                    ToolResponse::text(req.id, "\"Rust Browser Bridge\"")
                } else if expr.contains("collectUrls") {
                    ToolResponse::text(req.id, r#"["https://a.test","https://b.test","https://c.test"]"#)
                } else {
                    ToolResponse::text(req.id, "null")
                }
            }
            "wait.load" | "wait.dom" => ToolResponse::text(req.id, "ok"),
            "slow.tool" => {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                ToolResponse::text(req.id, "slow done")
            }
            "boom" => ToolResponse::failure(
                req.id,
                &BridgeError::target("selector matched nothing"),
            ),
            other => ToolResponse::text(req.id, format!("ran {other}")),
        }
    }
}

/// An in-process bus: a real daemon on a real socket, wired over duplex
/// pipes to a [`ScriptedRouter`] running the real framed service loop.
pub struct TestBus {
    pub bridge: Arc<Bridge>,
    pub socket: PathBuf,
    pub router: ScriptedRouter,
    link: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    _dir: TempDir,
}

impl TestBus {
    pub async fn start() -> Self {
        Self::start_with_config(|_| {}).await
    }

    /// Start with a config tweak (timeouts, prefixes).
    pub async fn start_with_config(tweak: impl FnOnce(&mut BridgeConfig)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = BridgeConfig {
            socket_path: dir.path().join("surf.sock"),
            network_dir: dir.path().join("network"),
            ..BridgeConfig::default()
        };
        tweak(&mut config);

        let bridge = Bridge::new(config);
        let router = ScriptedRouter::new();
        let link = attach_router(&bridge, router.clone());

        let socket = bridge.config().socket_path.clone();
        let server = BridgeServer::bind(Arc::clone(&bridge)).await.expect("bind");
        tokio::spawn(server.run());

        Self {
            bridge,
            socket,
            router,
            link: Mutex::new(Some(link)),
            _dir: dir,
        }
    }

    pub async fn client(&self) -> BridgeClient {
        BridgeClient::connect(&self.socket).await.expect("connect")
    }

    /// Simulate an extension reload: the pipe EOFs under the daemon.
    pub fn sever_router(&self) {
        if let Some(link) = self.link.lock().expect("link lock poisoned").take() {
            let _ = link.send(());
        }
    }

    /// Simulate the browser re-launching the host with a fresh pipe.
    pub fn reattach_router(&self) {
        let link = attach_router(&self.bridge, self.router.clone());
        *self.link.lock().expect("link lock poisoned") = Some(link);
    }
}

/// Wire a scripted router to the bridge over an in-memory pipe. The
/// returned sender severs the pipe when fired (dropping it is harmless).
pub fn attach_router(
    bridge: &Arc<Bridge>,
    router: ScriptedRouter,
) -> tokio::sync::oneshot::Sender<()> {
    let (daemon_side, router_side) = tokio::io::duplex(1024 * 1024);
    let (daemon_read, daemon_write) = tokio::io::split(daemon_side);
    bridge.attach_upstream(daemon_read, daemon_write);

    let (router_read, router_write) = tokio::io::split(router_side);
    let (kill_tx, kill_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let service = RouterService::new(router);
        tokio::select! {
            _ = service.run(router_read, router_write) => {}
            // A dropped sender leaves the branch disabled; only an explicit
            // send severs the pipe.
            Ok(()) = kill_rx => {}
        }
    });
    kill_tx
}

/// A raw NDJSON connection, for tests that need to drive the socket
/// protocol directly (duplicate ids, pings, interleaving).
pub async fn raw_conn(socket: &PathBuf) -> tokio::net::UnixStream {
    tokio::net::UnixStream::connect(socket).await.expect("connect")
}

/// Build an `execute_tool` request line.
pub fn request_line(id: &str, tool: &str, args: Value) -> String {
    let req = ToolRequest::new(id, tool, args);
    let mut line =
        serde_json::to_string(&surf::types::protocol::WireMessage::ToolRequest(req)).unwrap();
    line.push('\n');
    line
}

/// Convenience JSON args.
pub fn url_args(url: &str) -> Value {
    json!({ "url": url })
}
