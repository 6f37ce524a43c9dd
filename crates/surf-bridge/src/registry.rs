//! Pending-request bookkeeping.
//!
//! Every forwarded request gets a globally-unique upstream id
//! (`<prefix>-<counter>`) so ids from different client connections can never
//! collide on the pipe. The registry is the daemon's one shared mutable
//! structure; the mutex is held for single map operations only, never across
//! an await.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use surf_types::{BridgeError, RequestId};

/// How long a timed-out id keeps swallowing its late reply.
const TOMBSTONE_TTL: Duration = Duration::from_secs(10);

/// One in-flight request.
#[derive(Debug)]
pub struct Pending {
    /// Which client connection the reply goes back to.
    pub conn_id: u64,
    /// The id the client chose; restored on the reply.
    pub original_id: RequestId,
    pub tool: String,
    pub deadline: Instant,
    /// Fired (or dropped) when the request completes, releasing any lane
    /// held by the forwarding task.
    pub done_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

#[derive(Default)]
struct Inner {
    pending: HashMap<RequestId, Pending>,
    /// (conn, original id) pairs currently in flight; rejects in-flight
    /// duplicate ids from one connection.
    by_conn: HashSet<(u64, RequestId)>,
    /// Timed-out upstream ids whose late replies must be discarded.
    tombstones: HashMap<RequestId, Instant>,
}

/// The daemon's map from upstream id to pending request.
pub struct RequestRegistry {
    inner: Mutex<Inner>,
    counter: AtomicU64,
    prefix: String,
}

impl RequestRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            counter: AtomicU64::new(1),
            prefix: prefix.into(),
        }
    }

    /// Mint the next upstream id.
    pub fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        RequestId::new(format!("{}-{n}", self.prefix))
    }

    /// Register a pending request under its upstream id.
    ///
    /// Rejects a client id that is already in flight on the same connection;
    /// reuse after completion is fine.
    pub fn insert(&self, upstream_id: RequestId, pending: Pending) -> Result<(), BridgeError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let key = (pending.conn_id, pending.original_id.clone());
        if !inner.by_conn.insert(key) {
            return Err(BridgeError::protocol(format!(
                "id {:?} is already in flight on this connection",
                pending.original_id.as_str()
            )));
        }
        inner.pending.insert(upstream_id, pending);
        Ok(())
    }

    /// Take the pending entry for a reply.
    ///
    /// Returns `None` for unknown ids and for tombstoned (timed-out) ids;
    /// either way the caller drops the reply.
    pub fn take(&self, upstream_id: &RequestId) -> Option<Pending> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.tombstones.remove(upstream_id).is_some() {
            return None;
        }
        let pending = inner.pending.remove(upstream_id)?;
        inner
            .by_conn
            .remove(&(pending.conn_id, pending.original_id.clone()));
        Some(pending)
    }

    /// Move expired entries to tombstones and return them for synthetic
    /// timeout replies. Also sweeps tombstones past their own TTL.
    pub fn expire_due(&self, now: Instant) -> Vec<(RequestId, Pending)> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let due: Vec<RequestId> = inner
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for id in due {
            if let Some(pending) = inner.pending.remove(&id) {
                inner
                    .by_conn
                    .remove(&(pending.conn_id, pending.original_id.clone()));
                inner.tombstones.insert(id.clone(), now + TOMBSTONE_TTL);
                expired.push((id, pending));
            }
        }
        inner.tombstones.retain(|_, expiry| *expiry > now);
        expired
    }

    /// Drop every entry belonging to a closed connection, so its late
    /// replies are discarded silently.
    pub fn purge_conn(&self, conn_id: u64) -> usize {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let doomed: Vec<RequestId> = inner
            .pending
            .iter()
            .filter(|(_, p)| p.conn_id == conn_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            if let Some(pending) = inner.pending.remove(id) {
                inner
                    .by_conn
                    .remove(&(pending.conn_id, pending.original_id.clone()));
            }
        }
        doomed.len()
    }

    /// Remove and return every pending entry (upstream pipe loss).
    pub fn drain(&self) -> Vec<(RequestId, Pending)> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.by_conn.clear();
        inner.pending.drain().collect()
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").pending.len()
    }
}
