//! Nexus Inference Proxy Binary
//!
//! Standalone binary for the dynamic-batching inference proxy.
//! For library usage, see [`nexus_proxy`].

use nexus_proxy::{run_server, Config};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // RUST_LOG takes precedence; otherwise LOG_LEVEL drives the proxy's
    // own level, with unknown values falling back to info.
    let level = match config.log_level.as_str() {
        "debug" | "info" | "warn" | "error" => config.log_level.as_str(),
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nexus_proxy={level},tower_http=info")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    info!(
        port = config.port,
        batch_size = config.batch_size,
        batch_timeout_ms = config.batch_timeout.as_millis() as u64,
        model_server = %config.model_server_url,
        "starting NexusML inference proxy"
    );

    run_server(config).await
}
