//! Per-AI-site FIFO serialisation.
//!
//! Tools that drive a third-party AI chat site through a long UI sequence
//! cannot overlap on that site. Each site gets one lane; entering the lane
//! is a suspension point and only the head of the queue is forwarded. Every
//! other tool bypasses the lanes entirely.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// Map from site key to its lane. Lanes are created on first use and kept
/// for the life of the daemon; the set of AI sites is small and fixed.
#[derive(Default)]
pub struct SiteLanes {
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SiteLanes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serialisation key for a tool, if it needs one.
    ///
    /// AI tools are named `ai.<site>` or `ai.<site>.<operation>`; everything
    /// on one site shares a lane.
    pub fn site_key(tool: &str) -> Option<&str> {
        let rest = tool.strip_prefix("ai.")?;
        let site = rest.split('.').next()?;
        if site.is_empty() {
            return None;
        }
        Some(site)
    }

    /// Join the lane for `site` and wait for the head position.
    ///
    /// The returned guard must be held until the request completes; tokio's
    /// mutex queues waiters in FIFO order, which is exactly the lane
    /// discipline.
    pub async fn acquire(&self, site: &str) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock().expect("lanes lock poisoned");
            Arc::clone(
                lanes
                    .entry(site.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        lane.lock_owned().await
    }
}
