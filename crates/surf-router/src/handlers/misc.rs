//! JavaScript evaluation, cookies, and emulation tools.

use serde_json::json;

use crate::dispatch::{ToolCx, ToolOutput};
use crate::error::RouterError;

pub async fn run(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    match cx.params.tool.as_str() {
        "js.eval" => eval(cx).await,
        "cookies.get" => cookies_get(cx).await,
        "cookies.set" => cookies_set(cx).await,
        "cookies.clear" => cookies_clear(cx).await,
        "emulate.network" => emulate_network(cx).await,
        "emulate.cpu" => emulate_cpu(cx).await,
        "emulate.geo" => emulate_geo(cx).await,
        other => Err(RouterError::UnknownTool { name: other.to_string() }),
    }
}

async fn eval(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let expr = cx.arg_str("expr")?;
    let value = cx.evaluate(expr).await?;
    ToolOutput::json(&value)
}

async fn cookies_get(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let (_, client) = cx.session().await?;
    let params = match cx.opt_str("url") {
        Some(url) => json!({ "urls": [url] }),
        None => json!({}),
    };
    let result = client.send_command("Network.getCookies", params).await?;
    let cookies = result.get("cookies").cloned().unwrap_or(json!([]));
    ToolOutput::json(&cookies)
}

async fn cookies_set(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let name = cx.arg_str("name")?;
    let value = cx.arg_str("value")?;
    let url = cx.arg_str("url")?;
    let (_, client) = cx.session().await?;
    let result = client
        .send_command(
            "Network.setCookie",
            json!({ "name": name, "value": value, "url": url }),
        )
        .await?;
    if result.get("success").and_then(|v| v.as_bool()) == Some(false) {
        return Err(RouterError::CdpFailure {
            code: -1,
            message: format!("browser refused cookie '{name}'"),
        });
    }
    Ok(ToolOutput::text(format!("cookie {name} set")))
}

async fn cookies_clear(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let (_, client) = cx.session().await?;
    client
        .send_command("Network.clearBrowserCookies", json!({}))
        .await?;
    Ok(ToolOutput::text("cookies cleared"))
}

/// Throttle (or cut) the network. `offline: true` severs it entirely.
async fn emulate_network(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let offline = cx.opt_bool("offline").unwrap_or(false);
    let latency = cx.opt_f64("latencyMs").unwrap_or(0.0);
    // Throughputs arrive as kbit/s and go to the browser as bytes/s;
    // -1 leaves a direction unthrottled.
    let download = cx.opt_f64("downloadKbps").map(|k| k * 1024.0 / 8.0).unwrap_or(-1.0);
    let upload = cx.opt_f64("uploadKbps").map(|k| k * 1024.0 / 8.0).unwrap_or(-1.0);

    let (_, client) = cx.session().await?;
    client.enable_domain("Network").await?;
    client
        .send_command(
            "Network.emulateNetworkConditions",
            json!({
                "offline": offline,
                "latency": latency,
                "downloadThroughput": download,
                "uploadThroughput": upload,
            }),
        )
        .await?;
    Ok(ToolOutput::text(if offline {
        "network emulation: offline".to_string()
    } else {
        format!("network emulation: latency {latency}ms")
    }))
}

async fn emulate_cpu(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let rate = cx.opt_f64("rate").unwrap_or(1.0);
    if rate < 1.0 {
        return Err(RouterError::BadArgs {
            detail: "cpu throttle rate must be >= 1".to_string(),
        });
    }
    let (_, client) = cx.session().await?;
    client
        .send_command("Emulation.setCPUThrottlingRate", json!({ "rate": rate }))
        .await?;
    Ok(ToolOutput::text(format!("cpu throttled {rate}x")))
}

async fn emulate_geo(cx: &ToolCx<'_>) -> Result<ToolOutput, RouterError> {
    let latitude = cx.opt_f64("latitude").ok_or_else(|| RouterError::BadArgs {
        detail: "missing number argument 'latitude'".to_string(),
    })?;
    let longitude = cx.opt_f64("longitude").ok_or_else(|| RouterError::BadArgs {
        detail: "missing number argument 'longitude'".to_string(),
    })?;
    let accuracy = cx.opt_f64("accuracy").unwrap_or(1.0);
    let (_, client) = cx.session().await?;
    client
        .send_command(
            "Emulation.setGeolocationOverride",
            json!({ "latitude": latitude, "longitude": longitude, "accuracy": accuracy }),
        )
        .await?;
    Ok(ToolOutput::text(format!("geolocation set to {latitude}, {longitude}")))
}
