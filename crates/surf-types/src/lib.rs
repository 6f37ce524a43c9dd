//! Shared types for the surf browser-automation bridge.
//!
//! This crate holds everything the other surf crates agree on:
//!
//! - **`protocol`**: the JSON wire shapes spoken on the local client socket
//!   and on the framed native-messaging pipe (tool requests, tool replies,
//!   content parts, the ping/pong probe).
//! - **`error`**: the classified [`BridgeError`] carried across component
//!   boundaries, with one [`ErrorKind`] per failure family.
//! - **`config`**: [`BridgeConfig`] with default paths and environment
//!   overrides.
//! - **`ids`**: strongly-typed id wrappers ([`RequestId`], [`TabId`]).
//! - **`manifest`**: native-messaging manifest shapes for the supported
//!   Chromium derivatives.

pub mod config;
pub mod error;
pub mod ids;
pub mod manifest;
pub mod protocol;

pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorKind};
pub use ids::{RequestId, TabId};
pub use protocol::{ContentPart, ToolPayload, ToolRequest, ToolResponse, WireMessage};
