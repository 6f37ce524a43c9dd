//! Navigation tools: navigate, back, forward, reload.

use serde_json::json;

use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;
use crate::tabs::SessionMode;

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "navigate" => navigate(cx).await,
        "back" => history_step(cx, -1).await,
        "forward" => history_step(cx, 1).await,
        "reload" => reload(cx).await,
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

async fn navigate(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let url = cx.arg_str("url")?;
    match cx.mode {
        SessionMode::Debugger => {
            let (_, client) = cx.session().await?;
            let result = client
                .send_command("Page.navigate", json!({ "url": url }))
                .await?;
            if let Some(error_text) = result.get("errorText").and_then(|v| v.as_str()) {
                if !error_text.is_empty() {
                    return Err(RouterError::NavigationFailed {
                        reason: error_text.to_string(),
                    });
                }
            }
        }
        SessionMode::Scripting => {
            let url_js = serde_json::to_string(url).unwrap_or_default();
            cx.evaluate(&format!("window.location.assign({url_js})")).await?;
        }
    }
    Ok(ToolOutput::text(format!("navigated to {url}")))
}

async fn history_step(cx: &ToolCx<'_>, delta: i64) -> Result<ToolOutput, RouterError> {
    match cx.mode {
        SessionMode::Debugger => {
            let (_, client) = cx.session().await?;
            let history = client
                .send_command("Page.getNavigationHistory", json!({}))
                .await?;
            let current = history
                .get("currentIndex")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let entries = history
                .get("entries")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            let target = current + delta;
            if target < 0 || target as usize >= entries.len() {
                return Err(RouterError::NavigationFailed {
                    reason: "history boundary reached".to_string(),
                });
            }
            let entry_id = entries[target as usize]
                .get("id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| RouterError::Protocol {
                    detail: "navigation history entry without id".to_string(),
                })?;
            client
                .send_command("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
                .await?;
        }
        SessionMode::Scripting => {
            let call = if delta < 0 { "history.back()" } else { "history.forward()" };
            cx.evaluate(call).await?;
        }
    }
    Ok(ToolOutput::text(if delta < 0 { "went back" } else { "went forward" }))
}

async fn reload(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.mode {
        SessionMode::Debugger => {
            let (_, client) = cx.session().await?;
            client.send_command("Page.reload", json!({})).await?;
        }
        SessionMode::Scripting => {
            cx.evaluate("window.location.reload()").await?;
        }
    }
    Ok(ToolOutput::text("reloaded"))
}
