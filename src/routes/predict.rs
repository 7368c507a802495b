//! The prediction endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProxyError;
use crate::state::AppState;

/// Deadline imposed on each submission when the caller supplies none.
const SUBMIT_DEADLINE: Duration = Duration::from_secs(30);

/// Incoming inference request
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Opaque payload forwarded to the model server untouched
    pub data: Box<RawValue>,
}

/// Inference response
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<RawValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Single-request prediction; batched internally.
///
/// POST /predict
pub async fn predict(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ProxyError> {
    let request: PredictRequest =
        serde_json::from_slice(&body).map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let request_id = Uuid::new_v4();
    debug!(%request_id, "handling POST /predict");

    let outcome =
        tokio::time::timeout(SUBMIT_DEADLINE, state.batcher.submit(request_id, request.data))
            .await;

    let (status, response) = match outcome {
        Ok(Ok(result)) => (
            StatusCode::OK,
            PredictResponse { request_id, result: Some(result), error: None },
        ),
        Ok(Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            PredictResponse { request_id, result: None, error: Some(e.to_string()) },
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            PredictResponse {
                request_id,
                result: None,
                error: Some("deadline exceeded".to_string()),
            },
        ),
    };

    Ok((status, Json(response)))
}
