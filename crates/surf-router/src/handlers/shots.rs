//! Screenshot tools: viewport, full-page, cached-handle retrieval.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use serde_json::json;

use crate::cdp::CdpClient;
use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "screenshot" => {
            let (_, client) = cx.session().await?;
            let bytes = capture_viewport(&client).await?;
            Ok(ToolOutput {
                parts: vec![cx.router.screenshot_part(bytes)],
            })
        }
        "screenshot.full" => {
            let (_, client) = cx.session().await?;
            let bytes = capture_full_page(&client).await?;
            Ok(ToolOutput {
                parts: vec![cx.router.screenshot_part(bytes)],
            })
        }
        "screenshot.get" => {
            let id = cx.arg_str("id")?;
            let (bytes, mime) = cx.router.shots.get(id).ok_or_else(|| {
                RouterError::ElementNotFound {
                    what: format!("cached screenshot {id}"),
                }
            })?;
            Ok(ToolOutput {
                parts: vec![surf_types::protocol::ContentPart::image(B64.encode(&bytes), mime)],
            })
        }
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

/// Capture the viewport as PNG bytes.
pub(crate) async fn capture_viewport(client: &CdpClient) -> Result<Vec<u8>, RouterError> {
    let result = client
        .send_command("Page.captureScreenshot", json!({ "format": "png" }))
        .await?;
    decode_screenshot(&result)
}

/// Capture the whole page by clipping to the layout content size.
async fn capture_full_page(client: &CdpClient) -> Result<Vec<u8>, RouterError> {
    let metrics = client
        .send_command("Page.getLayoutMetrics", json!({}))
        .await?;
    let size = metrics
        .get("cssContentSize")
        .or_else(|| metrics.get("contentSize"))
        .ok_or_else(|| RouterError::Protocol {
            detail: "Page.getLayoutMetrics returned no content size".to_string(),
        })?;
    let width = size.get("width").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let height = size.get("height").and_then(|v| v.as_f64()).unwrap_or(0.0);

    let result = client
        .send_command(
            "Page.captureScreenshot",
            json!({
                "format": "png",
                "captureBeyondViewport": true,
                "clip": { "x": 0, "y": 0, "width": width, "height": height, "scale": 1 },
            }),
        )
        .await?;
    decode_screenshot(&result)
}

fn decode_screenshot(result: &serde_json::Value) -> Result<Vec<u8>, RouterError> {
    let data = result
        .get("data")
        .and_then(|d| d.as_str())
        .ok_or_else(|| RouterError::Protocol {
            detail: "Page.captureScreenshot returned no data".to_string(),
        })?;
    B64.decode(data).map_err(|e| RouterError::Protocol {
        detail: format!("undecodable screenshot payload: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_round_trips_png_magic() {
        let fake_png = vec![0x89, 0x50, 0x4E, 0x47];
        let result = json!({ "data": B64.encode(&fake_png) });
        assert_eq!(decode_screenshot(&result).unwrap(), fake_png);
    }

    #[test]
    fn decode_rejects_missing_data() {
        let err = decode_screenshot(&json!({})).unwrap_err();
        assert!(matches!(err, RouterError::Protocol { .. }));
    }

    #[test]
    fn decode_rejects_bad_base64() {
        let err = decode_screenshot(&json!({ "data": "not base64!!!" })).unwrap_err();
        assert!(matches!(err, RouterError::Protocol { .. }));
    }
}
