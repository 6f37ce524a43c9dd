//! Tab management tools.

use serde_json::json;

use surf_types::TabId;

use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "tab.list" => list(cx).await,
        "tab.new" => new_tab(cx).await,
        "tab.close" => close(cx).await,
        "tab.select" => select(cx).await,
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

async fn list(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let pages = cx.router.browser.list_pages().await?;
    let active = cx.router.tabs.active();
    let mut rows = Vec::with_capacity(pages.len());
    for page in pages {
        let session = cx.router.tabs.register(&page.target_id);
        rows.push(json!({
            "tabId": session.tab.0,
            "url": page.url,
            "title": page.title,
            "active": Some(session.tab) == active,
        }));
    }
    ToolOutput::json(&rows)
}

async fn new_tab(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let url = cx.opt_str("url").unwrap_or("about:blank");
    let target_id = cx.router.browser.create_target(url).await?;
    let session = cx.router.tabs.register(&target_id);
    cx.router.tabs.set_active(session.tab);
    ToolOutput::json(&json!({ "tabId": session.tab.0, "url": url }))
}

async fn close(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let tab = cx.tab()?;
    tab.detach().await;
    cx.router.browser.close_target(&tab.target_id).await?;
    cx.router.tabs.remove(tab.tab);
    Ok(ToolOutput::text(format!("closed tab {}", tab.tab)))
}

async fn select(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let tab_id = cx
        .params
        .tab_id
        .or_else(|| cx.opt_i64("tabId").map(TabId))
        .ok_or_else(|| RouterError::BadArgs {
            detail: "tab.select needs a tabId".to_string(),
        })?;
    let session = cx
        .router
        .tabs
        .get(tab_id)
        .ok_or(RouterError::TabNotFound { tab: tab_id.0 })?;
    cx.router.browser.activate_target(&session.target_id).await?;
    cx.router.tabs.set_active(tab_id);
    Ok(ToolOutput::text(format!("tab {tab_id} selected")))
}
