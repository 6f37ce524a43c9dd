//! The classified error carried across surf component boundaries.
//!
//! Every failure that can reach a client is one of six kinds. The kind
//! travels in the error text as a bracketed prefix (`[timeout] ...`) so
//! clients and tests can classify replies without a side channel.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure families, as surfaced to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket not found, native pipe closed, frame decode failure, oversized frame.
    Transport,
    /// Unknown tool, malformed args, id collision, duplicate reply.
    Protocol,
    /// Debugger attach refused, tab not controllable, scripting injection blocked.
    Capability,
    /// Element reference not found, selector matched nothing, URL unreachable.
    Target,
    /// Deadline expired before a reply arrived.
    Timeout,
    /// Capture log read/write failure, disk full during cleanup.
    Store,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Capability => "capability",
            ErrorKind::Target => "target",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Store => "store",
        };
        f.write_str(s)
    }
}

/// An error with its failure family attached.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{kind}] {message}")]
pub struct BridgeError {
    /// Which family this failure belongs to.
    pub kind: ErrorKind,
    /// Human-readable description, surfaced verbatim to clients.
    pub message: String,
}

impl BridgeError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn capability(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Capability, message)
    }

    pub fn target(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Target, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Store, message)
    }

    /// Parse the bracketed kind prefix back out of an error text.
    ///
    /// Returns `None` when the text does not carry a recognised prefix
    /// (e.g. an error produced by a foreign component).
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.strip_prefix('[')?;
        let (kind_str, message) = rest.split_once("] ")?;
        let kind = match kind_str {
            "transport" => ErrorKind::Transport,
            "protocol" => ErrorKind::Protocol,
            "capability" => ErrorKind::Capability,
            "target" => ErrorKind::Target,
            "timeout" => ErrorKind::Timeout,
            "store" => ErrorKind::Store,
            _ => return None,
        };
        Some(Self::new(kind, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let err = BridgeError::timeout("deadline expired after 30s");
        assert_eq!(err.to_string(), "[timeout] deadline expired after 30s");
    }

    #[test]
    fn parse_round_trips_display() {
        for err in [
            BridgeError::transport("pipe closed"),
            BridgeError::protocol("unknown tool: nope"),
            BridgeError::capability("attach refused"),
            BridgeError::target("element e4 not found"),
            BridgeError::timeout("deadline expired"),
            BridgeError::store("disk full"),
        ] {
            let parsed = BridgeError::parse(&err.to_string()).unwrap();
            assert_eq!(parsed.kind, err.kind);
            assert_eq!(parsed.message, err.message);
        }
    }

    #[test]
    fn parse_rejects_foreign_text() {
        assert!(BridgeError::parse("plain failure").is_none());
        assert!(BridgeError::parse("[weird] thing").is_none());
    }
}
