//! HTTP adapter for the backend model server.
//!
//! One batch becomes one `POST {base}/predict/batch` round-trip. Every
//! failure mode between "batch closed" and "parsed reply available" is
//! promoted to a batch-wide error; per-request errors reported by the model
//! server stay scoped to their own id.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::batcher::{Batch, BatchError, Dispatch, Response};

/// Deadline for one batch round-trip, independent of any caller's deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long pooled connections may sit idle before being dropped.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Batch request sent to the model server
#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    requests: Vec<SingleRequest<'a>>,
}

/// One inference request within a batch
#[derive(Debug, Serialize)]
struct SingleRequest<'a> {
    id: Uuid,
    data: &'a RawValue,
}

/// Batch response from the model server
#[derive(Debug, Deserialize)]
struct BatchResponse {
    responses: Vec<SingleResponse>,
}

/// One inference result; `error` set means the model failed this request
#[derive(Debug, Deserialize)]
struct SingleResponse {
    id: Uuid,
    #[serde(default)]
    result: Option<Box<RawValue>>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for the backend model server's batch endpoint
pub struct ModelClient {
    client: Client,
    base_url: String,
}

impl ModelClient {
    /// Create a client with a connection pool sized for the batch traffic.
    pub fn new(base_url: impl Into<String>, max_batch_size: usize) -> Self {
        let base_url = base_url.into();
        info!(url = %base_url, "creating model server client");

        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .pool_idle_timeout(POOL_IDLE_TIMEOUT)
                .pool_max_idle_per_host(max_batch_size.max(32))
                .build()
                .expect("failed to create HTTP client"),
            base_url,
        }
    }

    /// Base URL of the model server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the model server is reachable and ready.
    pub async fn health_check(&self) -> Result<(), BatchError> {
        let url = format!("{}/health", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BatchError::Status { status: status.as_u16(), body });
        }

        Ok(())
    }

    /// The same error for every request in the batch.
    fn fail_all(&self, batch: &Batch, error: BatchError) -> Vec<Response> {
        batch
            .requests
            .iter()
            .map(|request| Response::err(request.id, error.clone()))
            .collect()
    }
}

#[async_trait]
impl Dispatch for ModelClient {
    async fn dispatch(&self, batch: &Batch) -> Vec<Response> {
        let wire = BatchRequest {
            requests: batch
                .requests
                .iter()
                .map(|request| SingleRequest { id: request.id, data: &request.payload })
                .collect(),
        };

        let body = match serde_json::to_vec(&wire) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to encode batch request");
                return self.fail_all(batch, BatchError::Encode(e.to_string()));
            }
        };

        let url = format!("{}/predict/batch", self.base_url);
        let started = Instant::now();

        let response = match self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "failed to send batch to model server");
                return self.fail_all(batch, BatchError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to read model server response");
                return self.fail_all(batch, BatchError::Transport(e.to_string()));
            }
        };

        debug!(
            batch_size = batch.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            status = status.as_u16(),
            "model server response"
        );

        if !status.is_success() {
            let failure = BatchError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            };
            error!(error = %failure, "model server error");
            return self.fail_all(batch, failure);
        }

        let parsed: BatchResponse = match serde_json::from_slice(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "failed to decode model server response");
                return self.fail_all(batch, BatchError::Decode(e.to_string()));
            }
        };

        parsed
            .responses
            .into_iter()
            .map(|single| match single.error.filter(|e| !e.is_empty()) {
                Some(message) => Response::err(single.id, BatchError::Backend(message)),
                None => Response::ok(single.id, single.result.unwrap_or_else(raw_null)),
            })
            .collect()
    }
}

/// JSON `null` as a raw value, for responses that carry neither a result
/// nor an error.
fn raw_null() -> Box<RawValue> {
    RawValue::from_string("null".to_string()).expect("null is valid JSON")
}
