//! The router's framed service loop.
//!
//! A single reader consumes frames from the daemon; replies funnel through
//! one writer task so frames never interleave. Each request runs in its own
//! task; per-tab input locks provide whatever serialisation the browser
//! needs, so independent tools overlap freely.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use surf_types::protocol::WireMessage;

use crate::dispatch::RequestHandler;
use crate::error::RouterError;

/// Drives a [`RequestHandler`] from a framed pipe.
pub struct RouterService<H> {
    handler: Arc<H>,
}

impl<H: RequestHandler> RouterService<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Serve until the pipe closes. A clean EOF returns `Ok`; an
    /// unrecoverable framing error is the only `Err`.
    pub async fn run<R, W>(&self, mut reader: R, mut writer: W) -> Result<(), RouterError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<WireMessage>();
        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = surf_codec::write_json(&mut writer, &msg).await {
                    warn!(error = %e, "reply write failed, stopping writer");
                    break;
                }
            }
        });

        let result = loop {
            match surf_codec::read_json::<_, WireMessage>(&mut reader).await {
                Ok(Some(WireMessage::ToolRequest(req))) => {
                    let handler = Arc::clone(&self.handler);
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        debug!(tool = %req.params.tool, id = %req.id, "request received");
                        let resp = handler.handle(req).await;
                        let _ = tx.send(WireMessage::ToolResponse(resp));
                    });
                }
                Ok(Some(other)) => debug!(?other, "ignoring unexpected frame"),
                Ok(None) => {
                    debug!("pipe EOF, router service stopping");
                    break Ok(());
                }
                Err(surf_codec::CodecError::Json(e)) => {
                    // Framing survived; only this message is lost.
                    warn!(error = %e, "dropping malformed frame payload");
                }
                Err(e) => {
                    break Err(RouterError::Protocol {
                        detail: format!("pipe framing error: {e}"),
                    });
                }
            }
        };

        drop(tx);
        let _ = writer_task.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use surf_types::protocol::{ToolRequest, ToolResponse};

    /// Echoes the tool name; "slow" sleeps so overlap is observable.
    struct EchoHandler;

    #[async_trait]
    impl RequestHandler for EchoHandler {
        async fn handle(&self, req: ToolRequest) -> ToolResponse {
            if req.params.tool == "slow" {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            ToolResponse::text(req.id, format!("did {}", req.params.tool))
        }
    }

    #[tokio::test]
    async fn requests_round_trip_over_frames() {
        let (daemon_side, router_side) = tokio::io::duplex(64 * 1024);
        let (router_read, router_write) = tokio::io::split(router_side);
        let service = RouterService::new(EchoHandler);
        tokio::spawn(async move { service.run(router_read, router_write).await });

        let (mut read, mut write) = tokio::io::split(daemon_side);
        let req = ToolRequest::new("surf-1", "page.text", serde_json::json!({}));
        surf_codec::write_json(&mut write, &WireMessage::ToolRequest(req))
            .await
            .unwrap();

        let WireMessage::ToolResponse(resp) =
            surf_codec::read_json(&mut read).await.unwrap().unwrap()
        else {
            panic!("expected a reply frame");
        };
        assert_eq!(resp.id, "surf-1");
        assert_eq!(resp.first_text(), Some("did page.text"));
    }

    #[tokio::test]
    async fn slow_requests_do_not_block_fast_ones() {
        let (daemon_side, router_side) = tokio::io::duplex(64 * 1024);
        let (router_read, router_write) = tokio::io::split(router_side);
        let service = RouterService::new(EchoHandler);
        tokio::spawn(async move { service.run(router_read, router_write).await });

        let (mut read, mut write) = tokio::io::split(daemon_side);
        let slow = ToolRequest::new("surf-1", "slow", serde_json::json!({}));
        let fast = ToolRequest::new("surf-2", "fast", serde_json::json!({}));
        surf_codec::write_json(&mut write, &WireMessage::ToolRequest(slow))
            .await
            .unwrap();
        surf_codec::write_json(&mut write, &WireMessage::ToolRequest(fast))
            .await
            .unwrap();

        // The fast reply overtakes the slow one; correlation is by id.
        let WireMessage::ToolResponse(first) =
            surf_codec::read_json(&mut read).await.unwrap().unwrap()
        else {
            panic!("expected a reply frame");
        };
        assert_eq!(first.id, "surf-2");

        let WireMessage::ToolResponse(second) =
            surf_codec::read_json(&mut read).await.unwrap().unwrap()
        else {
            panic!("expected a reply frame");
        };
        assert_eq!(second.id, "surf-1");
    }

    #[tokio::test]
    async fn malformed_frame_payload_is_skipped() {
        let (daemon_side, router_side) = tokio::io::duplex(64 * 1024);
        let (router_read, router_write) = tokio::io::split(router_side);
        let service = RouterService::new(EchoHandler);
        tokio::spawn(async move { service.run(router_read, router_write).await });

        let (mut read, mut write) = tokio::io::split(daemon_side);
        surf_codec::write_frame(&mut write, b"not json at all").await.unwrap();
        let req = ToolRequest::new("surf-9", "after", serde_json::json!({}));
        surf_codec::write_json(&mut write, &WireMessage::ToolRequest(req))
            .await
            .unwrap();

        let WireMessage::ToolResponse(resp) =
            surf_codec::read_json(&mut read).await.unwrap().unwrap()
        else {
            panic!("expected a reply frame");
        };
        assert_eq!(resp.id, "surf-9");
    }
}
