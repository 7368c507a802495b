//! Health, readiness and metrics endpoints.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, Json};
use serde_json::json;

use crate::metrics::encode_metrics;
use crate::state::AppState;

/// Health check with batch totals
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let totals = state.batcher.metrics().snapshot();

    Json(json!({
        "status": "healthy",
        "uptime": format!("{:?}", state.started_at.elapsed()),
        "total_requests": totals.total_requests,
        "total_batches": totals.total_batches,
        "avg_batch_size": totals.avg_batch_size,
    }))
}

/// Ready check (for Kubernetes); 200 whenever requests are being accepted
///
/// GET /ready
pub async fn ready() -> impl IntoResponse {
    Json(json!({ "status": "ready" }))
}

/// Prometheus text exposition
///
/// GET /metrics
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
