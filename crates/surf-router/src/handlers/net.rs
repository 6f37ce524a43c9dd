//! Network-capture tools: start/stop interception and read the store.

use serde_json::json;

use surf_netlog::{BodyKind, NetworkFilter, StatusFilter, UrlPattern};

use crate::capture::{start_capture, stop_capture};
use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "net.start" => {
            let (tab, client) = cx.session().await?;
            start_capture(cx.router.store.clone(), &tab.capture, client).await?;
            Ok(ToolOutput::text(format!("capture started on tab {}", tab.tab)))
        }
        "net.stop" => {
            let (tab, client) = cx.session().await?;
            stop_capture(&tab.capture, &client).await?;
            Ok(ToolOutput::text(format!("capture stopped on tab {}", tab.tab)))
        }
        "net.query" => {
            let (filter, _) = filter_from_args(cx)?;
            let entries = cx.router.store.query(&filter)?;
            ToolOutput::json(&entries)
        }
        "net.body" => body(cx).await,
        "net.stats" => {
            let stats = cx.router.store.stats()?;
            ToolOutput::json(&json!({
                "entries": stats.entries,
                "bodies": stats.bodies,
                "bodyBytes": stats.body_bytes,
                "logBytes": stats.log_bytes,
                "oldest": stats.oldest,
                "newest": stats.newest,
            }))
        }
        "net.clear" => {
            let (filter, any) = filter_from_args(cx)?;
            let removed = cx
                .router
                .store
                .clear(if any { Some(&filter) } else { None })?;
            Ok(ToolOutput::text(format!("removed {removed} entries")))
        }
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

async fn body(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let hash = cx.arg_str("hash")?;
    let kind = match cx.opt_str("kind").unwrap_or("res") {
        "req" => BodyKind::Request,
        "res" => BodyKind::Response,
        other => {
            return Err(RouterError::BadArgs {
                detail: format!("kind must be 'req' or 'res', got '{other}'"),
            })
        }
    };
    let bytes = cx.router.store.read_body(hash, kind)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(ToolOutput::text(text)),
        Err(raw) => {
            use base64::Engine as _;
            let encoded = base64::engine::general_purpose::STANDARD.encode(raw.as_bytes());
            Ok(ToolOutput::text(format!("base64:{encoded}")))
        }
    }
}

/// Build a store filter from tool args; the flag reports whether any
/// predicate was set (a bare `net.clear` wipes everything).
fn filter_from_args(cx: &ToolCx<'_>) -> Result<(NetworkFilter, bool), RouterError> {
    let mut filter = NetworkFilter::new();
    let mut any = false;

    if let Some(origin) = cx.opt_str("origin") {
        filter = filter.origin(origin);
        any = true;
    }
    if let Some(method) = cx.opt_str("method") {
        filter = filter.method(method);
        any = true;
    }
    if let Some(status) = cx.opt_str("status") {
        let parsed = StatusFilter::parse(status).ok_or_else(|| RouterError::BadArgs {
            detail: format!("bad status filter '{status}' (use e.g. 404 or 4xx)"),
        })?;
        filter = filter.status(parsed);
        any = true;
    }
    if let Some(fragment) = cx.opt_str("contentType") {
        filter = filter.content_type(fragment);
        any = true;
    }
    if let Some(since) = cx.opt_i64("sinceMs") {
        filter = filter.since_ms(since);
        any = true;
    }
    if let Some(with_body) = cx.opt_bool("withBody") {
        filter = filter.with_body(with_body);
        any = true;
    }
    if cx.opt_bool("excludeStatic") == Some(true) {
        filter = filter.exclude_static();
        any = true;
    }
    if let Some(pattern) = cx.opt_str("url") {
        let parsed = UrlPattern::parse(pattern).map_err(|e| RouterError::BadArgs {
            detail: format!("bad url pattern '{pattern}': {e}"),
        })?;
        filter = filter.url_pattern(parsed);
        any = true;
    }
    if let Some(tail) = cx.opt_i64("tail") {
        if tail < 0 {
            return Err(RouterError::BadArgs {
                detail: "tail must be non-negative".to_string(),
            });
        }
        filter = filter.tail(tail as usize);
        // Tail alone does not make `net.clear` selective.
    }

    Ok((filter, any))
}
