//! Native-messaging manifest shapes.
//!
//! The installer that writes these files per browser is an external
//! collaborator; this module only defines the JSON the browsers expect and
//! the per-browser manifest directories on unix-likes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The fixed list of Chromium derivatives the manifest is registered with.
pub const SUPPORTED_BROWSERS: &[Browser] = &[
    Browser::Chrome,
    Browser::Chromium,
    Browser::Edge,
    Browser::Brave,
    Browser::Arc,
];

/// A supported Chromium-family browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    Chrome,
    Chromium,
    Edge,
    Brave,
    Arc,
}

/// A native-messaging host manifest, as written to disk per browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeManifest {
    /// Host name the extension connects to (reverse-DNS style).
    pub name: String,
    pub description: String,
    /// Absolute path to the host binary.
    pub path: PathBuf,
    /// Always `"stdio"`.
    #[serde(rename = "type")]
    pub transport: String,
    /// Extension origins allowed to launch the host.
    pub allowed_origins: Vec<String>,
}

impl NativeManifest {
    /// Build a manifest for the given host binary and extension id.
    pub fn new(host_path: PathBuf, extension_id: &str) -> Self {
        Self {
            name: "com.surf.bridge".to_string(),
            description: "surf browser-automation bridge".to_string(),
            path: host_path,
            transport: "stdio".to_string(),
            allowed_origins: vec![format!("chrome-extension://{extension_id}/")],
        }
    }
}

/// Manifest directory for a browser under the given home, unix-like layout.
#[cfg(unix)]
pub fn manifest_dir(home: &std::path::Path, browser: Browser) -> PathBuf {
    let suffix = match browser {
        Browser::Chrome => "google-chrome/NativeMessagingHosts",
        Browser::Chromium => "chromium/NativeMessagingHosts",
        Browser::Edge => "microsoft-edge/NativeMessagingHosts",
        Browser::Brave => "BraveSoftware/Brave-Browser/NativeMessagingHosts",
        Browser::Arc => "Arc/User Data/NativeMessagingHosts",
    };
    home.join(".config").join(suffix)
}
