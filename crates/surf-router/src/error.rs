//! Router error types and their classification.

use std::time::Duration;

use surf_types::{BridgeError, ErrorKind};

/// Errors raised while driving the browser.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Failed to establish a WebSocket connection to the DevTools endpoint.
    #[error("failed to connect to DevTools at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A DevTools command returned an error response.
    #[error("DevTools error {code}: {message}")]
    CdpFailure { code: i64, message: String },

    /// A DevTools command timed out waiting for a response.
    #[error("DevTools command '{method}' timed out after {duration:?}")]
    CommandTimeout { method: String, duration: Duration },

    /// A protocol-level failure (serialization, unexpected message shape).
    #[error("DevTools protocol error: {detail}")]
    Protocol { detail: String },

    /// The tool name is not in the vocabulary.
    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    /// Tool arguments were missing or of the wrong shape.
    #[error("malformed arguments: {detail}")]
    BadArgs { detail: String },

    /// The addressed tab does not exist (closed, or never known).
    #[error("tab {tab} not found")]
    TabNotFound { tab: i64 },

    /// An element reference or selector resolved to nothing.
    #[error("element not found: {what}")]
    ElementNotFound { what: String },

    /// Navigation was refused or failed at the network layer.
    #[error("navigation failed: {reason}")]
    NavigationFailed { reason: String },

    /// Page JavaScript threw.
    #[error("JavaScript exception: {message}")]
    JsException { message: String },

    /// The browser refused the debugger session for this target.
    #[error("debugger attach refused: {reason}")]
    AttachRefused { reason: String },

    /// The page is restricted (browser-internal origin, policy block).
    #[error("page is restricted: {reason}")]
    Restricted { reason: String },

    /// The tool requires a capability this host cannot provide.
    #[error("capability unavailable: {detail}")]
    Unsupported { detail: String },

    /// A wait condition did not hold before its deadline.
    #[error("wait timed out: {what}")]
    WaitTimeout { what: String },

    /// Illegal capture state transition.
    #[error("capture state error: {detail}")]
    CaptureState { detail: String },

    /// Network-capture store failure.
    #[error(transparent)]
    Store(#[from] surf_netlog::StoreError),
}

impl RouterError {
    /// Which of the six client-visible families this error falls in.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouterError::ConnectionFailed { .. } | RouterError::Protocol { .. } => {
                ErrorKind::Transport
            }
            RouterError::UnknownTool { .. }
            | RouterError::BadArgs { .. }
            | RouterError::CaptureState { .. } => ErrorKind::Protocol,
            RouterError::AttachRefused { .. }
            | RouterError::Restricted { .. }
            | RouterError::Unsupported { .. }
            | RouterError::CdpFailure { .. } => ErrorKind::Capability,
            RouterError::TabNotFound { .. }
            | RouterError::ElementNotFound { .. }
            | RouterError::NavigationFailed { .. }
            | RouterError::JsException { .. } => ErrorKind::Target,
            RouterError::CommandTimeout { .. } | RouterError::WaitTimeout { .. } => {
                ErrorKind::Timeout
            }
            RouterError::Store(_) => ErrorKind::Store,
        }
    }

    /// Whether the scripting path may be tried after this failure.
    pub fn allows_fallback(&self) -> bool {
        self.kind() == ErrorKind::Capability
    }

    /// Convert to the classified wire error.
    pub fn to_bridge(&self) -> BridgeError {
        BridgeError::new(self.kind(), self.to_string())
    }
}
