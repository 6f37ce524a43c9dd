//! Bridge configuration: paths, deadlines, and environment overrides.
//!
//! Precedence is programmatic override > environment > built-in default.
//! Components receive the resolved paths by injection; nothing reads the
//! environment at use sites.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the network-capture base directory.
pub const ENV_NETWORK_PATH: &str = "SURF_NETWORK_PATH";
/// Environment variable overriding the local socket path.
pub const ENV_SOCKET_PATH: &str = "SURF_SOCKET_PATH";

/// Default per-request deadline in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Top-level configuration for the bridge daemon and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Local-domain socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Base directory of the network-capture store.
    pub network_dir: PathBuf,
    /// Default per-request deadline, milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Per-tool deadline overrides, milliseconds.
    #[serde(default)]
    pub tool_timeouts_ms: HashMap<String, u64>,
    /// Prefix for daemon-rewritten upstream ids.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_id_prefix() -> String {
    "surf".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            network_dir: default_network_dir(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            tool_timeouts_ms: HashMap::new(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(p) = std::env::var(ENV_SOCKET_PATH) {
            if !p.is_empty() {
                cfg.socket_path = PathBuf::from(p);
            }
        }
        if let Ok(p) = std::env::var(ENV_NETWORK_PATH) {
            if !p.is_empty() {
                cfg.network_dir = PathBuf::from(p);
            }
        }
        cfg
    }

    /// The deadline for a given tool, falling back to the default.
    pub fn timeout_for(&self, tool: &str) -> Duration {
        let ms = self
            .tool_timeouts_ms
            .get(tool)
            .copied()
            .unwrap_or(self.request_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Default local socket path.
pub fn default_socket_path() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp/surf.sock")
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(r"\\.\pipe\surf")
    }
}

/// Default network-capture base directory.
pub fn default_network_dir() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp/surf")
    }
    #[cfg(not(unix))]
    {
        std::env::temp_dir().join("surf")
    }
}
