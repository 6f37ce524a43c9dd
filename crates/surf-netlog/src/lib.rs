//! Append-only, content-addressed log of intercepted HTTP traffic.
//!
//! Capture (in the router's host process) appends; clients query. The store
//! is a directory:
//!
//! ```text
//! requests.jsonl     one entry per line
//! bodies/<hash>.req  request bodies, named by sha-256 of their bytes
//! bodies/<hash>.res  response bodies
//! .meta              { "lastCleanup": <ms> }
//! .lock              append serialisation
//! ```
//!
//! Identical bodies occupy one file (content addressing dedups them).
//! Entries live until the 24-hour TTL or the 200 MB size cap evicts them;
//! cleanup is an atomic rewrite ordered so that a crash leaves only orphaned
//! entries, never dangling bodies.

pub mod cleanup;
pub mod entry;
pub mod filter;
pub mod store;

pub use cleanup::CleanupReport;
pub use entry::{BodyKind, NetworkEntry};
pub use filter::{NetworkFilter, StatusFilter, UrlPattern};
pub use store::{NetworkStore, StoreError, StoreStats};
