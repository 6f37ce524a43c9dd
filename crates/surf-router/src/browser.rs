//! Browser-level DevTools connection: target discovery and lifecycle.
//!
//! The per-tab sessions in [`crate::tabs`] each own a page-level WebSocket;
//! this handle owns the one browser-level connection used for creating,
//! closing, and listing targets.

use serde::Deserialize;
use serde_json::json;

use crate::cdp::CdpClient;
use crate::error::RouterError;

#[derive(Debug, Deserialize)]
struct JsonVersion {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// A page target as reported by the browser.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub target_id: String,
    pub url: String,
    pub title: String,
}

/// The browser-level session.
pub struct BrowserHandle {
    client: CdpClient,
    port: u16,
}

impl BrowserHandle {
    /// Discover the browser WebSocket via `/json/version` and connect.
    ///
    /// The browser must be running with `--remote-debugging-port={port}`.
    pub async fn connect(port: u16) -> Result<Self, RouterError> {
        let url = format!("http://127.0.0.1:{port}/json/version");
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| RouterError::Protocol {
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        let resp = http
            .get(&url)
            .send()
            .await
            .map_err(|e| RouterError::ConnectionFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        if !resp.status().is_success() {
            return Err(RouterError::ConnectionFailed {
                url,
                reason: format!("/json/version returned {}", resp.status()),
            });
        }
        let version: JsonVersion = resp.json().await.map_err(|e| RouterError::Protocol {
            detail: format!("unparseable /json/version response: {e}"),
        })?;

        let client = CdpClient::connect(&version.web_socket_debugger_url).await?;
        tracing::info!(port, "browser DevTools connection established");
        Ok(Self { client, port })
    }

    /// Page-level WebSocket URL for a target.
    pub fn page_ws_url(&self, target_id: &str) -> String {
        format!("ws://127.0.0.1:{}/devtools/page/{target_id}", self.port)
    }

    /// Open a new tab; returns its target id.
    pub async fn create_target(&self, url: &str) -> Result<String, RouterError> {
        let result = self
            .client
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| RouterError::Protocol {
                detail: "Target.createTarget returned no targetId".to_string(),
            })
    }

    /// Close a tab.
    pub async fn close_target(&self, target_id: &str) -> Result<(), RouterError> {
        self.client
            .send_command("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    /// Bring a tab to the foreground.
    pub async fn activate_target(&self, target_id: &str) -> Result<(), RouterError> {
        self.client
            .send_command("Target.activateTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    /// List page targets (tabs), excluding workers and extensions pages.
    pub async fn list_pages(&self) -> Result<Vec<TargetInfo>, RouterError> {
        let result = self
            .client
            .send_command("Target.getTargets", json!({}))
            .await?;
        let infos = result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                    .filter_map(|t| {
                        Some(TargetInfo {
                            target_id: t.get("targetId")?.as_str()?.to_string(),
                            url: t.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                            title: t
                                .get("title")
                                .and_then(|v| v.as_str())
                                .unwrap_or("")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(infos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_version_parses() {
        let version: JsonVersion = serde_json::from_value(serde_json::json!({
            "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/abc"
        }))
        .unwrap();
        assert!(version.web_socket_debugger_url.contains("devtools/browser"));
    }

    #[test]
    fn target_list_parsing_filters_pages() {
        let result = serde_json::json!({
            "targetInfos": [
                { "targetId": "T1", "type": "page", "url": "https://a", "title": "A" },
                { "targetId": "W1", "type": "service_worker", "url": "https://w", "title": "" },
                { "targetId": "T2", "type": "page", "url": "https://b", "title": "B" }
            ]
        });
        let infos: Vec<TargetInfo> = result
            .get("targetInfos")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                    .filter_map(|t| {
                        Some(TargetInfo {
                            target_id: t.get("targetId")?.as_str()?.to_string(),
                            url: t.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                            title: t.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].target_id, "T1");
        assert_eq!(infos[1].title, "B");
    }
}
