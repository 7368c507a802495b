//! Nexus Inference Proxy Library
//!
//! Dynamic-batching proxy for ML model servers: accepts individual
//! prediction requests over HTTP, coalesces them into size- and
//! time-bounded batches, and dispatches each batch as a single call to the
//! backend model server.
//!
//! This library provides the core functionality for the proxy, which can be
//! used either as a standalone binary or embedded in tests.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub mod batcher;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::Config;
pub use state::AppState;

use batcher::Batcher;
use client::ModelClient;

/// Initialize the Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("failed to register Prometheus metrics: {}", e);
    }
}

/// Build the ingress router with all routes and middleware.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/predict", post(routes::predict))
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/metrics", get(routes::metrics))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

/// Run the inference proxy server.
///
/// Starts the HTTP server and blocks until it is shut down by SIGINT or
/// SIGTERM, then stops the batcher, which dispatches everything still
/// queued before returning.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    init_metrics();

    let client = Arc::new(ModelClient::new(&config.model_server_url, config.batch_size));

    // The proxy starts even when the backend is down; requests fail until
    // it comes back.
    match client.health_check().await {
        Ok(()) => info!("connected to model server at {}", config.model_server_url),
        Err(e) => warn!(
            "could not reach model server at {}: {}",
            config.model_server_url, e
        ),
    }

    let batcher = Batcher::start(config.batch_size, config.batch_timeout, client);
    let state = Arc::new(AppState::new(batcher));
    let app = app(Arc::clone(&state));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("inference proxy listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    state.batcher.shutdown().await;
    info!("server stopped");

    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
