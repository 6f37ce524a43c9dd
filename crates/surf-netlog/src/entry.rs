//! The per-request log entry and its id scheme.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which side of the exchange a body belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Request,
    Response,
}

impl BodyKind {
    /// File extension under `bodies/`.
    pub fn extension(self) -> &'static str {
        match self {
            BodyKind::Request => "req",
            BodyKind::Response => "res",
        }
    }
}

/// One captured request/response pair, persisted as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEntry {
    /// `<millis>-<6 hex>`; sortable by time, unique across processes.
    pub id: String,
    /// Capture time, unix milliseconds.
    pub timestamp: i64,
    pub url: String,
    pub method: String,
    pub status: u16,
    #[serde(rename = "contentType", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(rename = "requestHeaders", default, skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, String>,
    #[serde(rename = "responseHeaders", default, skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, String>,
    #[serde(rename = "requestBodyHash", default, skip_serializing_if = "Option::is_none")]
    pub request_body_hash: Option<String>,
    #[serde(rename = "responseBodyHash", default, skip_serializing_if = "Option::is_none")]
    pub response_body_hash: Option<String>,
}

impl NetworkEntry {
    /// Create an entry stamped now.
    pub fn new(url: impl Into<String>, method: impl Into<String>, status: u16) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self::at(now, url, method, status)
    }

    /// Create an entry with an explicit timestamp (capture replay, tests).
    pub fn at(timestamp: i64, url: impl Into<String>, method: impl Into<String>, status: u16) -> Self {
        Self {
            id: entry_id(timestamp),
            timestamp,
            url: url.into(),
            method: method.into().to_uppercase(),
            status,
            content_type: None,
            request_headers: HashMap::new(),
            response_headers: HashMap::new(),
            request_body_hash: None,
            response_body_hash: None,
        }
    }

    /// The entry's origin (`scheme://host[:port]`), if the URL parses.
    pub fn origin(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        let origin = match parsed.port() {
            Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
            None => format!("{}://{}", parsed.scheme(), host),
        };
        Some(origin)
    }

    /// The hash referenced for the given body kind.
    pub fn body_hash(&self, kind: BodyKind) -> Option<&str> {
        match kind {
            BodyKind::Request => self.request_body_hash.as_deref(),
            BodyKind::Response => self.response_body_hash.as_deref(),
        }
    }

    /// Whether the entry references any body at all.
    pub fn has_body(&self) -> bool {
        self.request_body_hash.is_some() || self.response_body_hash.is_some()
    }
}

/// Generate a `<millis>-<6 hex>` entry id.
pub fn entry_id(timestamp_ms: i64) -> String {
    let salt: u32 = rand::random::<u32>() & 0xff_ffff;
    format!("{timestamp_ms}-{salt:06x}")
}
