//! Waiting tools: load, DOM stability, element, URL, network idle.

use std::time::{Duration, Instant};

use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;
use crate::tabs::SessionMode;

const DEFAULT_WAIT: Duration = Duration::from_secs(10);
const MAX_WAIT: Duration = Duration::from_secs(120);
const POLL: Duration = Duration::from_millis(200);

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let deadline = Instant::now() + wait_budget(cx);
    match cx.params.tool.as_str() {
        "wait.load" => load(cx, deadline).await,
        "wait.dom" => dom_stable(cx, deadline).await,
        "wait.element" => element(cx, deadline).await,
        "wait.url" => url(cx, deadline).await,
        "wait.idle" => network_idle(cx, deadline).await,
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

fn wait_budget(cx: &ToolCx<'_>) -> Duration {
    let ms = cx.opt_i64("timeoutMs").unwrap_or(DEFAULT_WAIT.as_millis() as i64);
    clamp_budget(ms)
}

fn clamp_budget(ms: i64) -> Duration {
    Duration::from_millis(ms.max(0) as u64).min(MAX_WAIT)
}

/// Wait for the load event (debugger) or a complete ready state (scripting).
async fn load(cx: &ToolCx<'_>, deadline: Instant) -> Result<ToolOutput, RouterError> {
    if cx.mode == SessionMode::Debugger {
        let (_, client) = cx.session().await?;
        let mut events = client.subscribe();
        // The event may have fired long before we subscribed.
        let state = cx.evaluate("document.readyState").await?;
        if state.as_str() == Some("complete") {
            return Ok(ToolOutput::text("loaded"));
        }
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RouterError::WaitTimeout { what: "page load".into() });
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) if event.method == "Page.loadEventFired" => {
                    return Ok(ToolOutput::text("loaded"))
                }
                Ok(Ok(_)) => continue,
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(_)) => {
                    return Err(RouterError::Protocol {
                        detail: "session closed while waiting for load".into(),
                    })
                }
                Err(_) => return Err(RouterError::WaitTimeout { what: "page load".into() }),
            }
        }
    } else {
        poll_expr_true(cx, deadline, "page load", "document.readyState === 'complete'").await?;
        Ok(ToolOutput::text("loaded"))
    }
}

/// Wait until two successive DOM size samples agree.
async fn dom_stable(cx: &ToolCx<'_>, deadline: Instant) -> Result<ToolOutput, RouterError> {
    let mut last = dom_size(cx).await?;
    loop {
        if Instant::now() >= deadline {
            return Err(RouterError::WaitTimeout { what: "dom stable".into() });
        }
        tokio::time::sleep(POLL).await;
        let next = dom_size(cx).await?;
        if next == last {
            return Ok(ToolOutput::text("dom stable"));
        }
        last = next;
    }
}

async fn dom_size(cx: &ToolCx<'_>) -> Result<i64, RouterError> {
    let value = cx
        .evaluate("document.body ? document.body.innerHTML.length : 0")
        .await?;
    Ok(value.as_i64().unwrap_or(0))
}

async fn element(cx: &ToolCx<'_>, deadline: Instant) -> Result<ToolOutput, RouterError> {
    let selector = cx.arg_str("selector")?;
    let sel_js = serde_json::to_string(selector).unwrap_or_default();
    let expr = format!("!!document.querySelector({sel_js})");
    poll_expr_true(cx, deadline, selector, &expr).await?;
    Ok(ToolOutput::text(format!("element {selector} present")))
}

async fn url(cx: &ToolCx<'_>, deadline: Instant) -> Result<ToolOutput, RouterError> {
    let fragment = cx.arg_str("contains")?;
    let frag_js = serde_json::to_string(fragment).unwrap_or_default();
    let expr = format!("location.href.includes({frag_js})");
    poll_expr_true(cx, deadline, "url match", &expr).await?;
    Ok(ToolOutput::text("url matched"))
}

/// Wait until no network request starts for `idleMs` (default 500 ms).
async fn network_idle(cx: &ToolCx<'_>, deadline: Instant) -> Result<ToolOutput, RouterError> {
    let idle = Duration::from_millis(cx.opt_i64("idleMs").unwrap_or(500).max(0) as u64);
    let (_, client) = cx.session().await?;
    client.enable_domain("Network").await?;
    let mut events = client.subscribe();

    let mut idle_since = Instant::now();
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(RouterError::WaitTimeout { what: "network idle".into() });
        }
        let idle_at = idle_since + idle;
        if now >= idle_at {
            return Ok(ToolOutput::text("network idle"));
        }
        let window = idle_at.min(deadline).saturating_duration_since(now);
        match tokio::time::timeout(window, events.recv()).await {
            Ok(Ok(event)) if event.method == "Network.requestWillBeSent" => {
                idle_since = Instant::now();
            }
            Ok(Ok(_)) | Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(_)) => {
                return Err(RouterError::Protocol {
                    detail: "session closed while waiting for idle".into(),
                })
            }
            Err(_) => {
                // Window elapsed quietly; loop re-checks which bound we hit.
            }
        }
    }
}

/// Poll a boolean page expression every [`POLL`] until it holds or the
/// deadline passes.
async fn poll_expr_true(
    cx: &ToolCx<'_>,
    deadline: Instant,
    what: &str,
    expr: &str,
) -> Result<(), RouterError> {
    loop {
        if cx.evaluate(expr).await?.as_bool() == Some(true) {
            return Ok(());
        }
        if Instant::now() + POLL >= deadline {
            return Err(RouterError::WaitTimeout { what: what.to_string() });
        }
        tokio::time::sleep(POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budgets_are_clamped() {
        assert_eq!(clamp_budget(600_000), MAX_WAIT);
        assert_eq!(clamp_budget(-5), Duration::ZERO);
        assert_eq!(clamp_budget(2_500), Duration::from_millis(2_500));
    }

    #[test]
    fn wait_timeouts_classify_as_timeout() {
        let err = RouterError::WaitTimeout { what: "page load".into() };
        assert_eq!(err.kind(), surf_types::ErrorKind::Timeout);
    }
}
