//! Router entry point: frames on stdio, DevTools on the other side.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use surf_router::{Router, RouterConfig, RouterService};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = RouterConfig::from_env();
    tracing::info!(
        cdp_port = config.cdp_port,
        network_dir = %config.network_dir.display(),
        "surf router starting"
    );

    let router = match Router::new(config).await {
        Ok(router) => router,
        Err(e) => {
            tracing::error!(error = %e, "failed to reach the browser");
            return ExitCode::FAILURE;
        }
    };

    let service = RouterService::new(router);
    match service.run(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "router stopping on pipe error");
            ExitCode::FAILURE
        }
    }
}
