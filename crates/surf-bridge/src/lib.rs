//! The bridge daemon: a multi-client socket server that multiplexes
//! concurrent tool requests onto a single full-duplex native-messaging pipe.
//!
//! Layout mirrors the flow of a request:
//!
//! - **`server`**: binds the local socket (with the stale-bus probe), accepts
//!   connections, and runs one reader task per client.
//! - **`bridge`**: the core. Owns the request registry, the upstream
//!   handle, and the AI-site lanes; forwards requests and routes replies.
//! - **`registry`**: pending-request bookkeeping, id rewriting, deadlines,
//!   and the tombstones that swallow late replies after a timeout.
//! - **`upstream`**: the single framed reader/writer pair over the pipe.
//! - **`lanes`**: per-AI-site FIFO serialisation.
//! - **`client`**: the async client used by the workflow engine, tests, and
//!   any other local consumer.

pub mod bridge;
pub mod client;
pub mod lanes;
pub mod registry;
pub mod server;
pub mod upstream;

pub use bridge::{Bridge, ExitReason};
pub use client::BridgeClient;
pub use server::BridgeServer;
