//! Page inspection: element references, text, state, search.

use std::collections::HashMap;

use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;
use crate::tabs::ElementRef;

/// Body text is capped so a reply always fits one frame.
const MAX_TEXT_LEN: usize = 200_000;

/// Stamps visible interactive elements into `window.__surfRefs` and returns
/// their geometry. The router only consumes the array; the page keeps the
/// live element handles.
const REF_SCRIPT: &str = r#"(() => {
  const sel = 'a[href], button, input, select, textarea, [role="button"], [role="link"], [role="textbox"], [onclick]';
  const refs = [];
  const out = [];
  for (const el of document.querySelectorAll(sel)) {
    const r = el.getBoundingClientRect();
    if (r.width <= 0 || r.height <= 0) continue;
    if (r.bottom < 0 || r.right < 0 || r.top > innerHeight || r.left > innerWidth) continue;
    refs.push(el);
    out.push({
      role: el.getAttribute('role') || el.tagName.toLowerCase(),
      name: (el.innerText || el.value || el.getAttribute('aria-label') || el.getAttribute('placeholder') || '').trim().slice(0, 80),
      x: r.x + r.width / 2,
      y: r.y + r.height / 2,
    });
    if (out.length >= 200) break;
  }
  window.__surfRefs = refs;
  return out;
})()"#;

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "page.read" => read(cx).await,
        "page.text" => text(cx).await,
        "page.state" => state(cx).await,
        "page.search" => search(cx).await,
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

/// Read the interactive structure of the page and (re)assign element
/// references. Prior labels stop resolving.
async fn read(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let tab = cx.tab()?;
    let value = cx.evaluate(REF_SCRIPT).await?;
    let items = value.as_array().cloned().unwrap_or_default();

    let mut refs = HashMap::with_capacity(items.len());
    let mut lines = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let label = format!("e{}", index + 1);
        let role = item.get("role").and_then(|v| v.as_str()).unwrap_or("node").to_string();
        let name = item.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let x = item.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let y = item.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
        lines.push(if name.is_empty() {
            format!("{label} {role}")
        } else {
            format!("{label} {role} \"{name}\"")
        });
        refs.insert(label, ElementRef { index, x, y, role, name });
    }
    tab.set_refs(refs);

    if lines.is_empty() {
        Ok(ToolOutput::text("no interactive elements visible"))
    } else {
        Ok(ToolOutput::text(lines.join("\n")))
    }
}

async fn text(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let value = cx
        .evaluate("document.body ? document.body.innerText : ''")
        .await?;
    let mut text = value.as_str().unwrap_or("").to_string();
    if text.len() > MAX_TEXT_LEN {
        let mut cut = MAX_TEXT_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("\n[truncated]");
    }
    Ok(ToolOutput::text(text))
}

async fn state(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let value = cx
        .evaluate(
            "JSON.stringify({ url: location.href, title: document.title, \
             readyState: document.readyState, scrollX, scrollY })",
        )
        .await?;
    let raw = value.as_str().ok_or_else(|| RouterError::Protocol {
        detail: "page state did not evaluate to a string".to_string(),
    })?;
    Ok(ToolOutput::text(raw))
}

async fn search(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let query = cx.arg_str("query")?;
    let query_js = serde_json::to_string(query).unwrap_or_default();
    let script = format!(
        r#"(() => {{
  const q = {query_js}.toLowerCase();
  const text = document.body ? document.body.innerText : '';
  const lower = text.toLowerCase();
  const hits = [];
  let from = 0;
  while (hits.length < 10) {{
    const at = lower.indexOf(q, from);
    if (at < 0) break;
    hits.push(text.slice(Math.max(0, at - 40), at + q.length + 40).replace(/\s+/g, ' '));
    from = at + q.length;
  }}
  let count = 0;
  for (let at = lower.indexOf(q); at >= 0; at = lower.indexOf(q, at + q.length)) count++;
  return {{ count, hits }};
}})()"#
    );
    let value = cx.evaluate(&script).await?;
    ToolOutput::json(&value)
}
