//! Async client for the bridge socket.
//!
//! Newline-delimited JSON over a Unix domain socket. One client issues
//! requests sequentially; correlation by id still applies, so a reply for
//! someone else's id (which a well-behaved daemon never sends) is skipped
//! rather than misread.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{unix::OwnedReadHalf, unix::OwnedWriteHalf, UnixStream};
use tracing::debug;

use surf_types::protocol::{PongReply, ToolRequest, ToolResponse, WireMessage};
use surf_types::{BridgeError, TabId};

/// A connected bridge client.
pub struct BridgeClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    counter: u64,
}

impl BridgeClient {
    /// Connect to the daemon socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let stream = UnixStream::connect(path.as_ref()).await.map_err(|e| {
            BridgeError::transport(format!(
                "cannot reach bridge socket {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read_half).lines(),
            writer,
            counter: 0,
        })
    }

    /// Execute a tool with a client-generated id.
    pub async fn execute(
        &mut self,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolResponse, BridgeError> {
        self.counter += 1;
        let id = format!("c{}", self.counter);
        self.request(ToolRequest::new(id, tool, args)).await
    }

    /// Execute a tool against a specific tab.
    pub async fn execute_on(
        &mut self,
        tool: &str,
        args: serde_json::Value,
        tab: TabId,
    ) -> Result<ToolResponse, BridgeError> {
        self.counter += 1;
        let id = format!("c{}", self.counter);
        self.request(ToolRequest::new(id, tool, args).with_tab(tab)).await
    }

    /// Send a fully-formed request and wait for its reply.
    pub async fn request(&mut self, req: ToolRequest) -> Result<ToolResponse, BridgeError> {
        let want = req.id.clone();
        let mut line = serde_json::to_string(&WireMessage::ToolRequest(req))
            .map_err(|e| BridgeError::protocol(format!("unserialisable request: {e}")))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::transport(format!("socket write failed: {e}")))?;

        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| BridgeError::transport(format!("socket read failed: {e}")))?
                .ok_or_else(|| BridgeError::transport("bridge closed the connection"))?;
            match serde_json::from_str::<WireMessage>(&line) {
                Ok(WireMessage::ToolResponse(resp)) if resp.id == want => return Ok(resp),
                Ok(other) => debug!(?other, "skipping unrelated line"),
                Err(e) => debug!(error = %e, "skipping unparseable line"),
            }
        }
    }
}

/// Send one ping on a fresh connection and wait briefly for the pong.
///
/// `None` means nobody (or nothing speaking our protocol) answered within
/// the budget; the caller treats the socket file as stale.
pub async fn probe(path: &Path, timeout: Duration) -> Option<PongReply> {
    let attempt = async {
        let mut stream = UnixStream::connect(path).await.ok()?;
        stream.write_all(b"{\"type\":\"ping\"}\n").await.ok()?;
        let mut lines = BufReader::new(stream).lines();
        loop {
            let line = lines.next_line().await.ok()??;
            if let Ok(WireMessage::Pong(pong)) = serde_json::from_str::<WireMessage>(&line) {
                return Some(pong);
            }
        }
    };
    tokio::time::timeout(timeout, attempt).await.ok().flatten()
}
