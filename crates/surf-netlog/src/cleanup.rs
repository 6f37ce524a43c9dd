//! TTL and size-cap cleanup with crash-safe ordering.
//!
//! The rewrite is ordered so that an interruption at any point leaves the
//! store readable: body files are deleted only **after** the surviving set
//! is computed and **before** the log rename, so a crash can orphan entries
//! (bodies missing) but never strand body files no entry describes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{referenced_files, NetworkStore, StoreError};

/// Entries older than this are dropped.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// On-disk total (log + referenced bodies) kept under this.
pub const DEFAULT_SIZE_CAP: u64 = 200 * 1024 * 1024;
/// Auto-cleanup runs at most this often per store.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed_entries: usize,
    pub removed_bodies: usize,
    pub surviving_entries: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Meta {
    #[serde(rename = "lastCleanup", default)]
    last_cleanup: i64,
}

impl NetworkStore {
    /// Run a cleanup pass with the default TTL and size cap.
    pub fn cleanup(&self) -> Result<CleanupReport, StoreError> {
        self.cleanup_with(DEFAULT_TTL, DEFAULT_SIZE_CAP)
    }

    /// Run a cleanup pass with explicit bounds.
    pub fn cleanup_with(&self, ttl: Duration, size_cap: u64) -> Result<CleanupReport, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let cutoff = now - ttl.as_millis() as i64;

        let mut entries = self.read_entries()?;
        let before = entries.len();
        entries.retain(|e| e.timestamp >= cutoff);
        entries.sort_by_key(|e| e.timestamp);

        // Sizes of every body file currently on disk, keyed by file name.
        let mut file_sizes = std::collections::HashMap::new();
        for dirent in std::fs::read_dir(self.bodies_dir())? {
            let dirent = dirent?;
            if let Ok(meta) = dirent.metadata() {
                if meta.is_file() {
                    file_sizes.insert(dirent.file_name().to_string_lossy().into_owned(), meta.len());
                }
            }
        }

        // Reference counts and running total for the size-cap eviction.
        // Bodies are content-addressed, so a file only stops costing bytes
        // when its last referring entry is evicted.
        let mut line_sizes = Vec::with_capacity(entries.len());
        let mut refs: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut total: u64 = 0;
        for entry in &entries {
            let line = serde_json::to_string(entry)?.len() as u64 + 1;
            line_sizes.push(line);
            total += line;
            for name in referenced_files(std::slice::from_ref(entry)) {
                let count = refs.entry(name.clone()).or_insert(0);
                *count += 1;
                if *count == 1 {
                    total += file_sizes.get(&name).copied().unwrap_or(0);
                }
            }
        }

        let mut evict = 0;
        while total > size_cap && evict < entries.len() {
            total -= line_sizes[evict];
            for name in referenced_files(std::slice::from_ref(&entries[evict])) {
                if let Some(count) = refs.get_mut(&name) {
                    *count -= 1;
                    if *count == 0 {
                        total -= file_sizes.get(&name).copied().unwrap_or(0);
                    }
                }
            }
            evict += 1;
        }
        entries.drain(..evict);

        // Surviving set first, then body deletion, then the rename.
        let keep = referenced_files(&entries);
        let removed_bodies = self.sweep_unreferenced_bodies(&keep)?;
        self.rewrite(&entries)?;
        self.write_meta(now)?;

        let report = CleanupReport {
            removed_entries: before - entries.len(),
            removed_bodies,
            surviving_entries: entries.len(),
        };
        tracing::info!(
            removed_entries = report.removed_entries,
            removed_bodies = report.removed_bodies,
            surviving = report.surviving_entries,
            "capture cleanup finished"
        );
        Ok(report)
    }

    /// Run a cleanup pass only if the last one is older than
    /// [`CLEANUP_INTERVAL`]. Returns whether a pass ran.
    pub fn maybe_cleanup(&self) -> Result<bool, StoreError> {
        let now = chrono::Utc::now().timestamp_millis();
        let last = self.last_cleanup().unwrap_or(0);
        if now - last < CLEANUP_INTERVAL.as_millis() as i64 {
            return Ok(false);
        }
        self.cleanup()?;
        Ok(true)
    }

    /// Kick off the boot-time stale check without blocking startup.
    ///
    /// Cleanup failures are logged and retried on the next cycle; they never
    /// fail an append.
    pub fn spawn_boot_check(&self) {
        let store = self.clone();
        std::thread::Builder::new()
            .name("netlog-cleanup".into())
            .spawn(move || {
                if let Err(e) = store.maybe_cleanup() {
                    tracing::warn!(error = %e, "boot-time capture cleanup failed");
                }
            })
            .ok();
    }

    /// Timestamp of the last completed cleanup, unix milliseconds.
    pub fn last_cleanup(&self) -> Option<i64> {
        let raw = std::fs::read_to_string(self.meta_path()).ok()?;
        let meta: Meta = serde_json::from_str(&raw).ok()?;
        Some(meta.last_cleanup)
    }

    fn write_meta(&self, now: i64) -> Result<(), StoreError> {
        let meta = Meta { last_cleanup: now };
        std::fs::write(self.meta_path(), serde_json::to_string(&meta)?)?;
        Ok(())
    }
}
