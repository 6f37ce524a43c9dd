//! Input tools: click, type, key, hover, scroll, drag.
//!
//! Debugger mode dispatches real trusted input events; scripting mode
//! synthesises DOM-level equivalents where that is honest (`click`, `type`,
//! `scroll`). Hardware-level tools (`key`, `hover`, `drag`) are declared
//! debugger-only in the dispatch table and never reach the fallback.
//!
//! Every debugger-mode handler holds the tab's input lock across its whole
//! event sequence, so concurrent tools cannot interleave a mouse-down from
//! one gesture with the mouse-up of another.

use serde_json::{json, Value};

use crate::cdp::CdpClient;
use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;
use crate::tabs::{SessionMode, TabSession};

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "click" => click(cx).await,
        "type" => type_text(cx).await,
        "key" => key(cx).await,
        "hover" => hover(cx).await,
        "scroll" => scroll(cx).await,
        "drag" => drag(cx).await,
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

// ---------------------------------------------------------------------------
// Target resolution
// ---------------------------------------------------------------------------

/// Find the point a pointer tool aims at: an element reference from the
/// last `page.read`, a CSS selector, or raw coordinates.
async fn resolve_point(
    cx: &ToolCx<'_>,
    tab: &TabSession,
    client: &CdpClient,
) -> Result<(f64, f64), RouterError> {
    if let Some(label) = cx.opt_str("ref") {
        let r = tab.resolve_ref(label).ok_or_else(|| RouterError::ElementNotFound {
            what: label.to_string(),
        })?;
        return Ok((r.x, r.y));
    }
    if let Some(selector) = cx.opt_str("selector") {
        return center_of_selector(client, selector).await;
    }
    if let (Some(x), Some(y)) = (cx.opt_f64("x"), cx.opt_f64("y")) {
        return Ok((x, y));
    }
    Err(RouterError::BadArgs {
        detail: "need 'ref', 'selector', or 'x'/'y'".to_string(),
    })
}

/// Centre of the first element matching a selector, via the DOM box model.
async fn center_of_selector(
    client: &CdpClient,
    selector: &str,
) -> Result<(f64, f64), RouterError> {
    let doc = client.send_command("DOM.getDocument", json!({})).await?;
    let root_id = doc
        .get("root")
        .and_then(|r| r.get("nodeId"))
        .and_then(|n| n.as_i64())
        .ok_or_else(|| RouterError::Protocol {
            detail: "DOM.getDocument returned no root nodeId".to_string(),
        })?;

    let found = client
        .send_command(
            "DOM.querySelector",
            json!({ "nodeId": root_id, "selector": selector }),
        )
        .await?;
    let node_id = found.get("nodeId").and_then(|n| n.as_i64()).unwrap_or(0);
    if node_id == 0 {
        return Err(RouterError::ElementNotFound {
            what: selector.to_string(),
        });
    }

    let model = client
        .send_command("DOM.getBoxModel", json!({ "nodeId": node_id }))
        .await?;
    let quad: Vec<f64> = model
        .get("model")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
        .unwrap_or_default();
    center_of_quad(&quad).ok_or_else(|| RouterError::ElementNotFound {
        what: format!("{selector} has no visible box"),
    })
}

/// Centre of a content quad (8 coordinates: x1,y1 .. x4,y4).
pub fn center_of_quad(quad: &[f64]) -> Option<(f64, f64)> {
    if quad.len() < 8 {
        return None;
    }
    let xs: Vec<f64> = quad.iter().step_by(2).copied().collect();
    let ys: Vec<f64> = quad.iter().skip(1).step_by(2).copied().collect();
    let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
    let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_x <= min_x || max_y <= min_y {
        return None;
    }
    Some(((min_x + max_x) / 2.0, (min_y + max_y) / 2.0))
}

/// A scripting-path expression resolving the target element, or an error if
/// the tool was called with coordinates only.
fn element_expression(cx: &ToolCx<'_>, tab: &TabSession) -> Result<String, RouterError> {
    if let Some(label) = cx.opt_str("ref") {
        let r = tab.resolve_ref(label).ok_or_else(|| RouterError::ElementNotFound {
            what: label.to_string(),
        })?;
        return Ok(format!(
            "(window.__surfRefs ? window.__surfRefs[{}] : null)",
            r.index
        ));
    }
    if let Some(selector) = cx.opt_str("selector") {
        let sel_js = serde_json::to_string(selector).unwrap_or_default();
        return Ok(format!("document.querySelector({sel_js})"));
    }
    if let (Some(x), Some(y)) = (cx.opt_f64("x"), cx.opt_f64("y")) {
        return Ok(format!("document.elementFromPoint({x}, {y})"));
    }
    Err(RouterError::BadArgs {
        detail: "need 'ref', 'selector', or 'x'/'y'".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Pointer events
// ---------------------------------------------------------------------------

fn mouse_event(kind: &str, x: f64, y: f64) -> Value {
    json!({
        "type": kind,
        "x": x,
        "y": y,
        "button": "left",
        "clickCount": 1,
    })
}

async fn click(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.mode {
        SessionMode::Debugger => {
            let (tab, client) = cx.session().await?;
            let _input = tab.input_lock.lock().await;
            let (x, y) = resolve_point(cx, &tab, &client).await?;
            client
                .send_command("Input.dispatchMouseEvent", mouse_event("mousePressed", x, y))
                .await?;
            client
                .send_command("Input.dispatchMouseEvent", mouse_event("mouseReleased", x, y))
                .await?;
            Ok(ToolOutput::text(format!("clicked at ({x:.0}, {y:.0})")))
        }
        SessionMode::Scripting => {
            let tab = cx.tab()?;
            let el = element_expression(cx, &tab)?;
            let hit = cx
                .evaluate(&format!("(() => {{ const el = {el}; if (!el) return false; el.click(); return true; }})()"))
                .await?;
            if hit.as_bool() != Some(true) {
                return Err(RouterError::ElementNotFound {
                    what: "click target".to_string(),
                });
            }
            Ok(ToolOutput::text("clicked"))
        }
    }
}

async fn hover(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let (tab, client) = cx.session().await?;
    let _input = tab.input_lock.lock().await;
    let (x, y) = resolve_point(cx, &tab, &client).await?;
    client
        .send_command(
            "Input.dispatchMouseEvent",
            json!({ "type": "mouseMoved", "x": x, "y": y }),
        )
        .await?;
    Ok(ToolOutput::text(format!("hovering ({x:.0}, {y:.0})")))
}

async fn drag(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let (from_x, from_y, to_x, to_y) = match (
        cx.opt_f64("fromX"),
        cx.opt_f64("fromY"),
        cx.opt_f64("toX"),
        cx.opt_f64("toY"),
    ) {
        (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
        _ => {
            return Err(RouterError::BadArgs {
                detail: "drag needs fromX/fromY/toX/toY".to_string(),
            })
        }
    };
    let (tab, client) = cx.session().await?;
    let _input = tab.input_lock.lock().await;
    client
        .send_command("Input.dispatchMouseEvent", mouse_event("mousePressed", from_x, from_y))
        .await?;
    // An intermediate move makes drop targets register the gesture.
    let (mid_x, mid_y) = ((from_x + to_x) / 2.0, (from_y + to_y) / 2.0);
    for (x, y) in [(mid_x, mid_y), (to_x, to_y)] {
        client
            .send_command(
                "Input.dispatchMouseEvent",
                json!({ "type": "mouseMoved", "x": x, "y": y, "button": "left" }),
            )
            .await?;
    }
    client
        .send_command("Input.dispatchMouseEvent", mouse_event("mouseReleased", to_x, to_y))
        .await?;
    Ok(ToolOutput::text("dragged"))
}

async fn scroll(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let dx = cx.opt_f64("dx").unwrap_or(0.0);
    let dy = cx.opt_f64("dy").unwrap_or(600.0);
    match cx.mode {
        SessionMode::Debugger => {
            let (tab, client) = cx.session().await?;
            let _input = tab.input_lock.lock().await;
            let x = cx.opt_f64("x").unwrap_or(100.0);
            let y = cx.opt_f64("y").unwrap_or(100.0);
            client
                .send_command(
                    "Input.dispatchMouseEvent",
                    json!({ "type": "mouseWheel", "x": x, "y": y, "deltaX": dx, "deltaY": dy }),
                )
                .await?;
        }
        SessionMode::Scripting => {
            cx.evaluate(&format!("window.scrollBy({dx}, {dy})")).await?;
        }
    }
    Ok(ToolOutput::text(format!("scrolled by ({dx:.0}, {dy:.0})")))
}

// ---------------------------------------------------------------------------
// Keyboard events
// ---------------------------------------------------------------------------

async fn type_text(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let text = cx.arg_str("text")?.to_string();
    match cx.mode {
        SessionMode::Debugger => {
            let (tab, client) = cx.session().await?;
            let _input = tab.input_lock.lock().await;
            // Focus the target first if one was named.
            if cx.opt_str("ref").is_some() || cx.opt_str("selector").is_some() {
                let (x, y) = resolve_point(cx, &tab, &client).await?;
                client
                    .send_command("Input.dispatchMouseEvent", mouse_event("mousePressed", x, y))
                    .await?;
                client
                    .send_command("Input.dispatchMouseEvent", mouse_event("mouseReleased", x, y))
                    .await?;
            }
            for ch in text.chars() {
                let ch_str = ch.to_string();
                for kind in ["keyDown", "keyUp"] {
                    client
                        .send_command(
                            "Input.dispatchKeyEvent",
                            json!({
                                "type": kind,
                                "text": ch_str,
                                "unmodifiedText": ch_str,
                                "key": ch_str,
                            }),
                        )
                        .await?;
                }
            }
        }
        SessionMode::Scripting => {
            let tab = cx.tab()?;
            let el = element_expression(cx, &tab)?;
            let text_js = serde_json::to_string(&text).unwrap_or_default();
            let hit = cx
                .evaluate(&format!(
                    "(() => {{ const el = {el}; if (!el) return false; el.focus(); \
                     el.value = {text_js}; \
                     el.dispatchEvent(new Event('input', {{bubbles: true}})); \
                     el.dispatchEvent(new Event('change', {{bubbles: true}})); \
                     return true; }})()"
                ))
                .await?;
            if hit.as_bool() != Some(true) {
                return Err(RouterError::ElementNotFound {
                    what: "type target".to_string(),
                });
            }
        }
    }
    Ok(ToolOutput::text(format!("typed {} characters", text.chars().count())))
}

/// Named keys and their Windows virtual key codes.
fn key_descriptor(name: &str) -> (String, String, i64, Option<String>) {
    match name {
        "Enter" => ("Enter".into(), "Enter".into(), 13, Some("\r".into())),
        "Tab" => ("Tab".into(), "Tab".into(), 9, None),
        "Escape" => ("Escape".into(), "Escape".into(), 27, None),
        "Backspace" => ("Backspace".into(), "Backspace".into(), 8, None),
        "Delete" => ("Delete".into(), "Delete".into(), 46, None),
        "ArrowUp" => ("ArrowUp".into(), "ArrowUp".into(), 38, None),
        "ArrowDown" => ("ArrowDown".into(), "ArrowDown".into(), 40, None),
        "ArrowLeft" => ("ArrowLeft".into(), "ArrowLeft".into(), 37, None),
        "ArrowRight" => ("ArrowRight".into(), "ArrowRight".into(), 39, None),
        "Home" => ("Home".into(), "Home".into(), 36, None),
        "End" => ("End".into(), "End".into(), 35, None),
        "PageUp" => ("PageUp".into(), "PageUp".into(), 33, None),
        "PageDown" => ("PageDown".into(), "PageDown".into(), 34, None),
        other => (other.into(), format!("Key{}", other.to_uppercase()), 0, Some(other.into())),
    }
}

async fn key(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let name = cx.arg_str("key")?;
    let (key_name, code, vk, text) = key_descriptor(name);
    let (tab, client) = cx.session().await?;
    let _input = tab.input_lock.lock().await;

    let mut down = json!({
        "type": "rawKeyDown",
        "key": key_name,
        "code": code,
        "windowsVirtualKeyCode": vk,
    });
    if let Some(text) = &text {
        down["type"] = json!("keyDown");
        down["text"] = json!(text);
        down["unmodifiedText"] = json!(text);
    }
    client.send_command("Input.dispatchKeyEvent", down).await?;
    client
        .send_command(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key_name,
                "code": code,
                "windowsVirtualKeyCode": vk,
            }),
        )
        .await?;
    Ok(ToolOutput::text(format!("pressed {name}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
