//! JSON wire shapes for the local client socket and the framed native pipe.
//!
//! Both transports speak the same message vocabulary: a client writes a
//! [`WireMessage::ToolRequest`] line on the socket, the daemon forwards the
//! same shape (with a rewritten id) as a frame to the router, and the reply
//! travels back as a [`WireMessage::ToolResponse`]. The ping/pong pair is the
//! daemon's self-describing liveness probe, answered on the socket only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;
use crate::ids::{RequestId, TabId};

/// Any message that can appear on the socket or the native pipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    ToolRequest(ToolRequest),
    ToolResponse(ToolResponse),
    Ping,
    Pong(PongReply),
}

/// A request to execute one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Always `"execute_tool"` today; kept explicit so the vocabulary can
    /// grow without a wire break.
    pub method: String,
    pub params: ToolParams,
    pub id: RequestId,
}

/// Tool name, arguments, and addressing for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParams {
    /// Tool name from the closed vocabulary (e.g. `"navigate"`, `"page.read"`).
    pub tool: String,
    /// Tool-specific arguments.
    #[serde(default)]
    pub args: Value,
    /// Target tab; `None` means the router's active tab.
    #[serde(rename = "tabId", default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    /// Target window, for tools that operate on windows.
    #[serde(rename = "windowId", default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
    /// Downgrade capability failures on restricted pages to a warning reply.
    #[serde(rename = "softFail", default, skip_serializing_if = "std::ops::Not::not")]
    pub soft_fail: bool,
    /// Suppress the post-action auto-screenshot for this request.
    #[serde(rename = "noScreenshot", default, skip_serializing_if = "std::ops::Not::not")]
    pub no_screenshot: bool,
}

impl ToolRequest {
    /// Build an `execute_tool` request.
    pub fn new(id: impl Into<RequestId>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            method: "execute_tool".to_string(),
            params: ToolParams {
                tool: tool.into(),
                args,
                tab_id: None,
                window_id: None,
                soft_fail: false,
                no_screenshot: false,
            },
            id: id.into(),
        }
    }

    /// Set the target tab.
    pub fn with_tab(mut self, tab: TabId) -> Self {
        self.params.tab_id = Some(tab);
        self
    }
}

/// One ordered piece of reply content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Base64-encoded image bytes.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentPart::Image {
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// The content carried by a result or an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    pub content: Vec<ContentPart>,
}

impl ToolPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
        }
    }
}

/// The single reply produced for every request.
///
/// Exactly one of `result` / `error` is present; `error` presence signals
/// failure. Streaming or partial replies are not part of the protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolPayload>,
}

impl ToolResponse {
    /// A success reply with the given content parts.
    pub fn success(id: impl Into<RequestId>, content: Vec<ContentPart>) -> Self {
        Self {
            id: id.into(),
            result: Some(ToolPayload { content }),
            error: None,
        }
    }

    /// A success reply with a single text part.
    pub fn text(id: impl Into<RequestId>, text: impl Into<String>) -> Self {
        Self::success(id, vec![ContentPart::text(text)])
    }

    /// An error reply carrying a classified bridge error.
    pub fn failure(id: impl Into<RequestId>, err: &BridgeError) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(ToolPayload::text(err.to_string())),
        }
    }

    /// Whether this reply signals failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The first text part of whichever payload is present.
    pub fn first_text(&self) -> Option<&str> {
        let payload = self.result.as_ref().or(self.error.as_ref())?;
        payload.content.iter().find_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            ContentPart::Image { .. } => None,
        })
    }

    /// Rewrite the id in place (daemon id restoration on the reply path).
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.id = id.into();
        self
    }
}

/// Whether the daemon currently holds a live native pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    Connected,
    Disconnected,
}

/// Answer to the socket liveness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongReply {
    /// Always `"surf-bridge"`; lets a prober distinguish this bus from an
    /// unrelated socket squatting on the same path.
    pub service: String,
    pub upstream: UpstreamState,
}

impl PongReply {
    pub fn new(upstream: UpstreamState) -> Self {
        Self {
            service: "surf-bridge".to_string(),
            upstream,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_request_wire_shape() {
        let req = ToolRequest::new("a1", "navigate", serde_json::json!({"url": "https://example.org"}))
            .with_tab(TabId(3));
        let json = serde_json::to_value(WireMessage::ToolRequest(req)).unwrap();
        assert_eq!(json["type"], "tool_request");
        assert_eq!(json["method"], "execute_tool");
        assert_eq!(json["params"]["tool"], "navigate");
        assert_eq!(json["params"]["args"]["url"], "https://example.org");
        assert_eq!(json["params"]["tabId"], 3);
        assert_eq!(json["id"], "a1");
        // Absent options stay off the wire.
        assert!(json["params"].get("windowId").is_none());
        assert!(json["params"].get("softFail").is_none());
    }

    #[test]
    fn tool_request_round_trip() {
        let raw = r#"{"type":"tool_request","method":"execute_tool","params":{"tool":"page.text","args":{},"softFail":true},"id":"b1"}"#;
        let msg: WireMessage = serde_json::from_str(raw).unwrap();
        let WireMessage::ToolRequest(req) = &msg else {
            panic!("expected a tool request");
        };
        assert_eq!(req.params.tool, "page.text");
        assert!(req.params.soft_fail);
        assert_eq!(req.id, "b1");
        let back = serde_json::to_value(&msg).unwrap();
        let again: WireMessage = serde_json::from_value(back).unwrap();
        let WireMessage::ToolRequest(req2) = again else {
            panic!("expected a tool request");
        };
        assert_eq!(req2.params.tool, req.params.tool);
        assert_eq!(req2.id, req.id);
    }

    #[test]
    fn response_success_shape() {
        let resp = ToolResponse::success(
            "a1",
            vec![
                ContentPart::text("done"),
                ContentPart::image("aGk=", "image/png"),
            ],
        );
        assert!(!resp.is_error());
        assert_eq!(resp.first_text(), Some("done"));
        let json = serde_json::to_value(WireMessage::ToolResponse(resp)).unwrap();
        assert_eq!(json["type"], "tool_response");
        assert_eq!(json["result"]["content"][0]["type"], "text");
        assert_eq!(json["result"]["content"][1]["mimeType"], "image/png");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn response_error_shape() {
        let err = BridgeError::target("element e4 not found");
        let resp = ToolResponse::failure("x", &err);
        assert!(resp.is_error());
        assert_eq!(resp.first_text(), Some("[target] element e4 not found"));
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["error"]["content"][0]["text"], "[target] element e4 not found");
    }

    #[test]
    fn ping_pong_shapes() {
        let ping = serde_json::to_value(WireMessage::Ping).unwrap();
        assert_eq!(ping, serde_json::json!({"type": "ping"}));

        let pong = serde_json::to_value(WireMessage::Pong(PongReply::new(UpstreamState::Connected)))
            .unwrap();
        assert_eq!(pong["type"], "pong");
        assert_eq!(pong["service"], "surf-bridge");
        assert_eq!(pong["upstream"], "connected");
    }

    #[test]
    fn id_restoration_preserves_payload() {
        let resp = ToolResponse::text("surf-17", "hello").with_id("a1");
        assert_eq!(resp.id, "a1");
        assert_eq!(resp.first_text(), Some("hello"));
    }
}
