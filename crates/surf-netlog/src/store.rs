//! The on-disk store: append, query, body I/O, stats, clear.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::entry::{BodyKind, NetworkEntry};
use crate::filter::NetworkFilter;

pub(crate) const LOG_FILE: &str = "requests.jsonl";
pub(crate) const BODIES_DIR: &str = "bodies";
pub(crate) const META_FILE: &str = ".meta";
pub(crate) const LOCK_FILE: &str = ".lock";

/// A lock older than this is considered abandoned and is broken.
const LOCK_STALE: Duration = Duration::from_secs(5);
/// Total time an appender waits on a contested, non-stale lock before
/// proceeding without it.
const LOCK_WAIT: Duration = Duration::from_millis(500);
const LOCK_POLL: Duration = Duration::from_millis(50);

/// Store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("log entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("body {hash}.{kind} not found")]
    BodyNotFound { hash: String, kind: &'static str },
}

/// Aggregate numbers over the store, as returned by [`NetworkStore::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub bodies: usize,
    pub body_bytes: u64,
    pub log_bytes: u64,
    /// Oldest / newest entry timestamps, unix milliseconds.
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

/// Handle to one capture directory. Cheap to clone; all state is on disk.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    base: PathBuf,
}

impl NetworkStore {
    /// Open (creating if needed) the store at `base`.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base.into();
        fs::create_dir_all(base.join(BODIES_DIR))?;
        Ok(Self { base })
    }

    /// The store's base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub(crate) fn log_path(&self) -> PathBuf {
        self.base.join(LOG_FILE)
    }

    pub(crate) fn bodies_dir(&self) -> PathBuf {
        self.base.join(BODIES_DIR)
    }

    pub(crate) fn meta_path(&self) -> PathBuf {
        self.base.join(META_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.base.join(LOCK_FILE)
    }

    // -----------------------------------------------------------------------
    // Bodies
    // -----------------------------------------------------------------------

    /// Store a body under its content hash; returns the hash.
    ///
    /// Byte-identical bodies land on the same file, so a second store of the
    /// same content is a no-op.
    pub fn store_body(&self, kind: BodyKind, bytes: &[u8]) -> Result<String, StoreError> {
        let hash = content_hash(bytes);
        let path = self.body_path(&hash, kind);
        if path.exists() {
            return Ok(hash);
        }
        // Write-temp-then-rename so a concurrent reader never sees a half
        // body under the final name.
        let tmp = path.with_extension(format!("{}.tmp{}", kind.extension(), std::process::id()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(hash)
    }

    /// Read a stored body back.
    pub fn read_body(&self, hash: &str, kind: BodyKind) -> Result<Vec<u8>, StoreError> {
        let path = self.body_path(hash, kind);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::BodyNotFound {
                    hash: hash.to_string(),
                    kind: kind.extension(),
                }
            } else {
                StoreError::Io(e)
            }
        })
    }

    fn body_path(&self, hash: &str, kind: BodyKind) -> PathBuf {
        self.bodies_dir().join(format!("{hash}.{}", kind.extension()))
    }

    // -----------------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------------

    /// Append one entry to the log.
    ///
    /// Serialised by the lock file when available. A contested, non-stale
    /// lock is tolerated after a bounded wait: the append proceeds without
    /// it, relying on the platform's append atomicity for small writes;
    /// readers skip any torn line.
    pub fn append(&self, entry: &NetworkEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let guard = acquire_lock(&self.lock_path(), LOCK_STALE, LOCK_WAIT);
        if guard.is_none() {
            tracing::debug!(id = %entry.id, "append lock contested, proceeding without it");
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.log_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Query
    // -----------------------------------------------------------------------

    /// Stream the log through a filter. Malformed lines are skipped; the
    /// tail count is applied as a final slice.
    pub fn query(&self, filter: &NetworkFilter) -> Result<Vec<NetworkEntry>, StoreError> {
        let file = match fs::File::open(self.log_path()) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut matches = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: NetworkEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(_) => continue,
            };
            if filter.matches(&entry) {
                matches.push(entry);
            }
        }

        if let Some(tail) = filter.tail {
            if matches.len() > tail {
                matches.drain(..matches.len() - tail);
            }
        }
        Ok(matches)
    }

    /// Read every well-formed entry in log order.
    pub(crate) fn read_entries(&self) -> Result<Vec<NetworkEntry>, StoreError> {
        self.query(&NetworkFilter::new())
    }

    // -----------------------------------------------------------------------
    // Stats, clear
    // -----------------------------------------------------------------------

    /// Aggregate counts and sizes.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let entries = self.read_entries()?;
        let mut stats = StoreStats {
            entries: entries.len(),
            log_bytes: fs::metadata(self.log_path()).map(|m| m.len()).unwrap_or(0),
            oldest: entries.iter().map(|e| e.timestamp).min(),
            newest: entries.iter().map(|e| e.timestamp).max(),
            ..StoreStats::default()
        };
        for dirent in fs::read_dir(self.bodies_dir())? {
            let meta = dirent?.metadata()?;
            if meta.is_file() {
                stats.bodies += 1;
                stats.body_bytes += meta.len();
            }
        }
        Ok(stats)
    }

    /// Drop entries matching the filter (all entries when `None`) and any
    /// body files no surviving entry references. Returns the removed count.
    pub fn clear(&self, filter: Option<&NetworkFilter>) -> Result<usize, StoreError> {
        let entries = self.read_entries()?;
        let before = entries.len();
        let surviving: Vec<NetworkEntry> = match filter {
            Some(f) => entries.into_iter().filter(|e| !f.matches(e)).collect(),
            None => Vec::new(),
        };
        let removed = before - surviving.len();

        let keep = referenced_files(&surviving);
        self.sweep_unreferenced_bodies(&keep)?;
        self.rewrite(&surviving)?;
        Ok(removed)
    }

    /// Atomically replace the log with the given entries.
    pub(crate) fn rewrite(&self, entries: &[NetworkEntry]) -> Result<(), StoreError> {
        let tmp = self.base.join(format!(".{LOG_FILE}.tmp{}", std::process::id()));
        {
            let mut file = fs::File::create(&tmp)?;
            for entry in entries {
                let mut line = serde_json::to_string(entry)?;
                line.push('\n');
                file.write_all(line.as_bytes())?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, self.log_path())?;
        Ok(())
    }

    /// Delete body files whose name is not in `keep`. Returns how many went.
    pub(crate) fn sweep_unreferenced_bodies(
        &self,
        keep: &HashSet<String>,
    ) -> Result<usize, StoreError> {
        let mut removed = 0;
        for dirent in fs::read_dir(self.bodies_dir())? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if !keep.contains(&name) {
                if let Err(e) = fs::remove_file(dirent.path()) {
                    tracing::warn!(file = %name, error = %e, "failed to delete body file");
                } else {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

/// Body file names referenced by the given entries.
pub(crate) fn referenced_files(entries: &[NetworkEntry]) -> HashSet<String> {
    let mut keep = HashSet::new();
    for entry in entries {
        for kind in [BodyKind::Request, BodyKind::Response] {
            if let Some(hash) = entry.body_hash(kind) {
                keep.insert(format!("{hash}.{}", kind.extension()));
            }
        }
    }
    keep
}

/// Hex sha-256 of the bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Removes the lock file on drop.
pub(crate) struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Try to take the append lock.
///
/// A lock file older than `stale` is broken. Returns `None` once `wait`
/// elapses on a contested, fresh lock; the caller proceeds lockless.
pub(crate) fn acquire_lock(path: &Path, stale: Duration, wait: Duration) -> Option<LockGuard> {
    let deadline = std::time::Instant::now() + wait;
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {
                return Some(LockGuard {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let is_stale = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|t| t.elapsed().ok())
                    .is_some_and(|age| age > stale);
                if is_stale {
                    tracing::warn!(path = %path.display(), "breaking stale append lock");
                    let _ = fs::remove_file(path);
                    continue;
                }
                if std::time::Instant::now() >= deadline {
                    return None;
                }
                std::thread::sleep(LOCK_POLL);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "lock file unavailable");
                return None;
            }
        }
    }
}
