//! Conjunctive query filters over the capture log.
//!
//! Every populated field must match for an entry to pass. The tail count is
//! not a per-entry predicate; the store applies it as a final slice.

use regex::Regex;

use crate::entry::NetworkEntry;

/// File extensions dropped by `exclude_static`.
const STATIC_EXTENSIONS: &[&str] = &[
    ".js", ".css", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".woff", ".woff2", ".ttf",
    ".otf", ".map", ".webp", ".avif",
];

/// A status predicate: exact code or an `Nxx` class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusFilter {
    Exact(u16),
    /// `4` matches 400..=499, etc.
    Class(u16),
}

impl StatusFilter {
    /// Parse `"404"` or `"4xx"` / `"4XX"`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(class) = s.strip_suffix("xx").or_else(|| s.strip_suffix("XX")) {
            let n: u16 = class.parse().ok()?;
            if (1..=5).contains(&n) {
                return Some(StatusFilter::Class(n));
            }
            return None;
        }
        s.parse().ok().map(StatusFilter::Exact)
    }

    fn matches(&self, status: u16) -> bool {
        match self {
            StatusFilter::Exact(code) => status == *code,
            StatusFilter::Class(class) => status / 100 == *class,
        }
    }
}

/// URL matching: `/regex/`, glob-with-`*`, or plain substring.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Regex(Regex),
    Glob(Regex),
    Substring(String),
}

impl UrlPattern {
    /// Parse the pattern syntax: `/…/` is a regex, a pattern containing `*`
    /// is a whole-URL glob, anything else is a substring test.
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let inner = &pattern[1..pattern.len() - 1];
            return Regex::new(inner).map(UrlPattern::Regex);
        }
        if pattern.contains('*') {
            let body = pattern
                .split('*')
                .map(|piece| regex::escape(piece))
                .collect::<Vec<_>>()
                .join(".*");
            return Regex::new(&format!("^{body}$")).map(UrlPattern::Glob);
        }
        Ok(UrlPattern::Substring(pattern.to_string()))
    }

    fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Regex(re) | UrlPattern::Glob(re) => re.is_match(url),
            UrlPattern::Substring(s) => url.contains(s.as_str()),
        }
    }
}

/// Conjunctive filter over [`NetworkEntry`] fields.
#[derive(Debug, Clone, Default)]
pub struct NetworkFilter {
    /// Exact origin (`scheme://host[:port]`).
    pub origin: Option<String>,
    /// Exact method; compared upper-cased.
    pub method: Option<String>,
    pub status: Option<StatusFilter>,
    /// Substring of the content type.
    pub content_type: Option<String>,
    /// Minimum timestamp, unix milliseconds.
    pub since_ms: Option<i64>,
    /// Require (or require absence of) a captured body.
    pub with_body: Option<bool>,
    /// Drop common asset extensions.
    pub exclude_static: bool,
    pub url_pattern: Option<UrlPattern>,
    /// Keep only the last N matches; applied by the store after filtering.
    pub tail: Option<usize>,
}

impl NetworkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into().to_uppercase());
        self
    }

    pub fn status(mut self, status: StatusFilter) -> Self {
        self.status = Some(status);
        self
    }

    pub fn content_type(mut self, fragment: impl Into<String>) -> Self {
        self.content_type = Some(fragment.into());
        self
    }

    pub fn since_ms(mut self, ms: i64) -> Self {
        self.since_ms = Some(ms);
        self
    }

    pub fn with_body(mut self, required: bool) -> Self {
        self.with_body = Some(required);
        self
    }

    pub fn exclude_static(mut self) -> Self {
        self.exclude_static = true;
        self
    }

    pub fn url_pattern(mut self, pattern: UrlPattern) -> Self {
        self.url_pattern = Some(pattern);
        self
    }

    pub fn tail(mut self, n: usize) -> Self {
        self.tail = Some(n);
        self
    }

    /// Whether the entry passes every populated predicate.
    pub fn matches(&self, entry: &NetworkEntry) -> bool {
        if let Some(origin) = &self.origin {
            if entry.origin().as_deref() != Some(origin.as_str()) {
                return false;
            }
        }
        if let Some(method) = &self.method {
            if entry.method != *method {
                return false;
            }
        }
        if let Some(status) = &self.status {
            if !status.matches(entry.status) {
                return false;
            }
        }
        if let Some(fragment) = &self.content_type {
            match &entry.content_type {
                Some(ct) if ct.contains(fragment.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(since) = self.since_ms {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(required) = self.with_body {
            if entry.has_body() != required {
                return false;
            }
        }
        if self.exclude_static && is_static_asset(&entry.url) {
            return false;
        }
        if let Some(pattern) = &self.url_pattern {
            if !pattern.matches(&entry.url) {
                return false;
            }
        }
        true
    }
}

/// Whether the URL path ends in a common asset extension.
fn is_static_asset(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let lower = path.to_ascii_lowercase();
    STATIC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
