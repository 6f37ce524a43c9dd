//! In-memory screenshot cache.
//!
//! Ids are unguessable 64-bit random hex. Eviction is strict LRU beyond the
//! byte cap, except that entries younger than the minimum retention are
//! never evicted: an id handed to a client stays resolvable for at least
//! that long, so the cache may transiently exceed its cap.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cap on total cached bytes (32 MiB).
pub const DEFAULT_MAX_BYTES: usize = 32 * 1024 * 1024;
/// Default minimum retention for a returned id.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30);

struct ShotEntry {
    bytes: Vec<u8>,
    mime: String,
    created: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, ShotEntry>,
    /// Least-recently-used id at the front.
    order: VecDeque<String>,
    total: usize,
}

/// Byte-bounded LRU cache of captured images.
pub struct ScreenshotCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
    min_retention: Duration,
}

impl ScreenshotCache {
    pub fn new(max_bytes: usize, min_retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_bytes,
            min_retention,
        }
    }

    /// Insert an image; returns its id.
    pub fn insert(&self, bytes: Vec<u8>, mime: impl Into<String>) -> String {
        let id = format!("{:016x}", rand::random::<u64>());
        let mut inner = self.inner.lock().expect("shot cache lock poisoned");
        inner.total += bytes.len();
        inner.entries.insert(
            id.clone(),
            ShotEntry {
                bytes,
                mime: mime.into(),
                created: Instant::now(),
            },
        );
        inner.order.push_back(id.clone());
        self.evict_locked(&mut inner);
        id
    }

    /// Fetch an image by id, marking it most recently used.
    pub fn get(&self, id: &str) -> Option<(Vec<u8>, String)> {
        let mut inner = self.inner.lock().expect("shot cache lock poisoned");
        let entry = inner.entries.get(id)?;
        let out = (entry.bytes.clone(), entry.mime.clone());
        if let Some(pos) = inner.order.iter().position(|x| x == id) {
            let id = inner.order.remove(pos).unwrap_or_else(|| id.to_string());
            inner.order.push_back(id);
        }
        Some(out)
    }

    /// Total bytes currently held.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().expect("shot cache lock poisoned").total
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("shot cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_locked(&self, inner: &mut Inner) {
        while inner.total > self.max_bytes {
            let Some(oldest) = inner.order.front().cloned() else {
                break;
            };
            let young = inner
                .entries
                .get(&oldest)
                .is_some_and(|e| e.created.elapsed() < self.min_retention);
            if young {
                // Everything older has gone; the rest is under retention.
                break;
            }
            inner.order.pop_front();
            if let Some(entry) = inner.entries.remove(&oldest) {
                inner.total -= entry.bytes.len();
            }
        }
    }
}

impl Default for ScreenshotCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES, DEFAULT_RETENTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sixteen_hex_and_unique() {
        let cache = ScreenshotCache::default();
        let a = cache.insert(vec![1, 2, 3], "image/png");
        let b = cache.insert(vec![4, 5], "image/png");
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn get_round_trips_bytes_and_mime() {
        let cache = ScreenshotCache::default();
        let id = cache.insert(vec![9, 8, 7], "image/jpeg");
        let (bytes, mime) = cache.get(&id).unwrap();
        assert_eq!(bytes, vec![9, 8, 7]);
        assert_eq!(mime, "image/jpeg");
        assert!(cache.get("0000000000000000").is_none());
    }

    #[test]
    fn lru_eviction_beyond_cap() {
        // Zero retention so the cap is the only constraint.
        let cache = ScreenshotCache::new(10, Duration::ZERO);
        let a = cache.insert(vec![0; 4], "image/png");
        let b = cache.insert(vec![0; 4], "image/png");
        // Touch `a` so `b` is the LRU.
        cache.get(&a).unwrap();
        let c = cache.insert(vec![0; 4], "image/png");

        assert!(cache.get(&b).is_none(), "LRU entry should be evicted");
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&c).is_some());
        assert!(cache.total_bytes() <= 10);
    }

    #[test]
    fn young_entries_survive_cap_pressure() {
        let cache = ScreenshotCache::new(4, Duration::from_secs(60));
        let a = cache.insert(vec![0; 4], "image/png");
        let b = cache.insert(vec![0; 4], "image/png");
        // Over cap, but both are younger than the retention window.
        assert!(cache.get(&a).is_some());
        assert!(cache.get(&b).is_some());
        assert!(cache.total_bytes() > 4);
    }
}
