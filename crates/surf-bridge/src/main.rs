//! Bridge daemon entry point.
//!
//! Launched by the browser as a native-messaging host: stdin/stdout are the
//! framed pipe to the extension, and the local socket serves clients.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use surf_bridge::server::BindError;
use surf_bridge::{Bridge, BridgeServer, ExitReason};
use surf_types::BridgeConfig;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout belongs to the native-messaging pipe.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = BridgeConfig::from_env();
    tracing::info!(
        socket = %config.socket_path.display(),
        network_dir = %config.network_dir.display(),
        "surf bridge starting"
    );

    let bridge = Bridge::new(config);
    let server = match BridgeServer::bind(std::sync::Arc::clone(&bridge)).await {
        Ok(server) => server,
        Err(BindError::AlreadyRunning { path }) => {
            tracing::info!(path = %path.display(), "bus already owned, exiting");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to bind bridge socket");
            return ExitCode::FAILURE;
        }
    };

    bridge.attach_upstream(tokio::io::stdin(), tokio::io::stdout());

    match server.run().await {
        ExitReason::Replaced => ExitCode::SUCCESS,
        ExitReason::ProtocolError(detail) => {
            tracing::error!(%detail, "exiting on pipe protocol error");
            ExitCode::FAILURE
        }
    }
}
