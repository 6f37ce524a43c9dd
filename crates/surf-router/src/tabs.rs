//! Per-tab sessions and the tab registry.
//!
//! Sessions are created lazily on first use. Attach is expensive
//! (100-500 ms), so each session keeps two connection slots (the full
//! debugger session and the evaluate-only scripting session) and attaches
//! each at most once. The slot mutex is held across the connect await, so
//! concurrent attachers queue behind a single in-flight attach and then see
//! the populated slot; there is no check-then-store race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::{json, Value};

use surf_types::TabId;

use crate::browser::BrowserHandle;
use crate::capture::CaptureSlot;
use crate::cdp::CdpClient;
use crate::error::RouterError;

/// Which connection flavour a handler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Full session: real input events, screenshots, network interception.
    Debugger,
    /// Evaluate-only session, for restricted pages and the fallback path.
    Scripting,
}

/// A stamped interactive element, valid until the next `page.read`.
#[derive(Debug, Clone)]
pub struct ElementRef {
    /// Position in the page-side refs array.
    pub index: usize,
    /// Centre point in CSS pixels at stamping time.
    pub x: f64,
    pub y: f64,
    pub role: String,
    pub name: String,
}

/// State for one driven tab.
pub struct TabSession {
    pub tab: TabId,
    pub target_id: String,
    debugger_slot: tokio::sync::Mutex<Option<Arc<CdpClient>>>,
    scripting_slot: tokio::sync::Mutex<Option<Arc<CdpClient>>>,
    /// Serialises input tools within this tab so mouse-down/mouse-up pairs
    /// never interleave.
    pub input_lock: tokio::sync::Mutex<()>,
    refs: Mutex<HashMap<String, ElementRef>>,
    pub capture: CaptureSlot,
    last_used: Mutex<Instant>,
}

impl TabSession {
    fn new(tab: TabId, target_id: String) -> Self {
        Self {
            tab,
            target_id,
            debugger_slot: tokio::sync::Mutex::new(None),
            scripting_slot: tokio::sync::Mutex::new(None),
            input_lock: tokio::sync::Mutex::new(()),
            refs: Mutex::new(HashMap::new()),
            capture: CaptureSlot::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Get (attaching lazily) the connection for the given mode.
    pub async fn session(
        &self,
        browser: &BrowserHandle,
        mode: SessionMode,
    ) -> Result<Arc<CdpClient>, RouterError> {
        let slot = match mode {
            SessionMode::Debugger => &self.debugger_slot,
            SessionMode::Scripting => &self.scripting_slot,
        };

        let mut guard = slot.lock().await;
        if let Some(client) = guard.as_ref() {
            if client.is_alive() {
                self.touch();
                return Ok(Arc::clone(client));
            }
            // The browser detached us (tab closed, devtools opened); the
            // next use re-attaches.
            *guard = None;
        }

        let ws_url = browser.page_ws_url(&self.target_id);
        let client = Arc::new(CdpClient::connect(&ws_url).await.map_err(|e| {
            RouterError::AttachRefused {
                reason: format!("tab {}: {e}", self.tab),
            }
        })?);
        match mode {
            SessionMode::Debugger => {
                client.enable_domain("Page").await?;
                client.enable_domain("DOM").await?;
                client.enable_domain("Runtime").await?;
            }
            SessionMode::Scripting => {
                client.enable_domain("Runtime").await?;
            }
        }
        *guard = Some(Arc::clone(&client));
        self.touch();
        tracing::debug!(tab = %self.tab, ?mode, "session attached");
        Ok(client)
    }

    /// Drop both connections (explicit detach or tab close).
    pub async fn detach(&self) {
        *self.debugger_slot.lock().await = None;
        *self.scripting_slot.lock().await = None;
        tracing::debug!(tab = %self.tab, "sessions detached");
    }

    /// Evaluate a JavaScript expression in the page, returning its value.
    ///
    /// Page exceptions surface as [`RouterError::JsException`].
    pub async fn evaluate(
        &self,
        browser: &BrowserHandle,
        mode: SessionMode,
        expression: &str,
    ) -> Result<Value, RouterError> {
        let client = self.session(browser, mode).await?;
        let result = client
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| exception.get("text").and_then(|t| t.as_str()))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(RouterError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Replace the element-reference table (every `page.read` resets it).
    pub fn set_refs(&self, refs: HashMap<String, ElementRef>) {
        *self.refs.lock().expect("refs lock poisoned") = refs;
    }

    /// Resolve a label stamped by the last `page.read`.
    pub fn resolve_ref(&self, label: &str) -> Option<ElementRef> {
        self.refs.lock().expect("refs lock poisoned").get(label).cloned()
    }

    pub fn touch(&self) {
        *self.last_used.lock().expect("last_used lock poisoned") = Instant::now();
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().expect("last_used lock poisoned")
    }
}

/// All known tabs, keyed by the integer ids clients address.
pub struct TabRegistry {
    tabs: Mutex<HashMap<i64, Arc<TabSession>>>,
    next: AtomicI64,
    active: Mutex<Option<TabId>>,
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TabRegistry {
    pub fn new() -> Self {
        Self {
            tabs: Mutex::new(HashMap::new()),
            next: AtomicI64::new(1),
            active: Mutex::new(None),
        }
    }

    /// Session for a target, creating and numbering it on first sight.
    pub fn register(&self, target_id: &str) -> Arc<TabSession> {
        let mut tabs = self.tabs.lock().expect("tabs lock poisoned");
        if let Some(existing) = tabs.values().find(|s| s.target_id == target_id) {
            return Arc::clone(existing);
        }
        let tab = TabId(self.next.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(TabSession::new(tab, target_id.to_string()));
        tabs.insert(tab.0, Arc::clone(&session));
        tracing::debug!(tab = %tab, target = target_id, "tab registered");
        session
    }

    pub fn get(&self, tab: TabId) -> Option<Arc<TabSession>> {
        self.tabs.lock().expect("tabs lock poisoned").get(&tab.0).cloned()
    }

    /// The session a request addresses: its explicit `tabId`, else the
    /// active tab.
    pub fn resolve(&self, tab: Option<TabId>) -> Result<Arc<TabSession>, RouterError> {
        match tab {
            Some(tab) => self.get(tab).ok_or(RouterError::TabNotFound { tab: tab.0 }),
            None => {
                let active = *self.active.lock().expect("active lock poisoned");
                let tab = active.ok_or(RouterError::TabNotFound { tab: -1 })?;
                self.get(tab).ok_or(RouterError::TabNotFound { tab: tab.0 })
            }
        }
    }

    pub fn remove(&self, tab: TabId) -> Option<Arc<TabSession>> {
        let removed = self.tabs.lock().expect("tabs lock poisoned").remove(&tab.0);
        let mut active = self.active.lock().expect("active lock poisoned");
        if *active == Some(tab) {
            *active = None;
        }
        removed
    }

    pub fn set_active(&self, tab: TabId) {
        *self.active.lock().expect("active lock poisoned") = Some(tab);
    }

    pub fn active(&self) -> Option<TabId> {
        *self.active.lock().expect("active lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_numbers_targets_once() {
        let reg = TabRegistry::new();
        let a = reg.register("TARGET-A");
        let b = reg.register("TARGET-B");
        let a_again = reg.register("TARGET-A");
        assert_eq!(a.tab, a_again.tab);
        assert_ne!(a.tab, b.tab);
    }

    #[test]
    fn resolve_prefers_explicit_tab() {
        let reg = TabRegistry::new();
        let a = reg.register("A");
        let b = reg.register("B");
        reg.set_active(a.tab);

        assert_eq!(reg.resolve(Some(b.tab)).unwrap().tab, b.tab);
        assert_eq!(reg.resolve(None).unwrap().tab, a.tab);
    }

    #[test]
    fn resolve_missing_tab_is_a_target_error() {
        let reg = TabRegistry::new();
        let err = reg.resolve(Some(TabId(99))).unwrap_err();
        assert!(matches!(err, RouterError::TabNotFound { tab: 99 }));
        // No active tab either.
        let err = reg.resolve(None).unwrap_err();
        assert!(matches!(err, RouterError::TabNotFound { .. }));
    }

    #[test]
    fn remove_clears_active() {
        let reg = TabRegistry::new();
        let a = reg.register("A");
        reg.set_active(a.tab);
        reg.remove(a.tab);
        assert_eq!(reg.active(), None);
        assert!(reg.get(a.tab).is_none());
    }

    #[test]
    fn refs_reset_wholesale() {
        let session = TabSession::new(TabId(1), "T".into());
        let mut first = HashMap::new();
        first.insert(
            "e1".to_string(),
            ElementRef { index: 0, x: 10.0, y: 20.0, role: "button".into(), name: "Go".into() },
        );
        session.set_refs(first);
        assert!(session.resolve_ref("e1").is_some());

        // A new read replaces the table; stale labels stop resolving.
        let mut second = HashMap::new();
        second.insert(
            "e1".to_string(),
            ElementRef { index: 0, x: 1.0, y: 2.0, role: "link".into(), name: "Home".into() },
        );
        session.set_refs(second);
        let r = session.resolve_ref("e1").unwrap();
        assert_eq!(r.role, "link");
        assert!(session.resolve_ref("e2").is_none());
    }
}
