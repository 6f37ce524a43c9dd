//! surf: a browser-automation bridge.
//!
//! External agents drive a Chromium-family browser through a stable
//! request/response protocol: a long-lived daemon accepts JSON requests on a
//! local socket, forwards them over the browser's native-messaging transport
//! to a command router, and returns structured replies. Intercepted network
//! traffic lands in a content-addressed capture store that clients query
//! independently.
//!
//! This crate re-exports the workspace members:
//!
//! - [`types`]: wire protocol, errors, configuration, ids
//! - [`codec`]: length-prefixed JSON framing
//! - [`netlog`]: the network-capture store
//! - [`bridge`]: the daemon and its client
//! - [`router`]: the extension-side command router
//! - [`workflow`]: the client-side workflow engine

pub use surf_bridge as bridge;
pub use surf_codec as codec;
pub use surf_netlog as netlog;
pub use surf_router as router;
pub use surf_types as types;
pub use surf_workflow as workflow;
