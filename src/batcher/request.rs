//! Request, response and batch types for the batching engine.
//!
//! Payloads are opaque to the batcher: callers hand in raw JSON and get raw
//! JSON back, byte-for-byte. Any typed schema lives in the ingress layer and
//! in the model server, not here.

use serde_json::value::RawValue;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Errors produced while batching or dispatching a request.
///
/// One dispatch failure fans out to every request in the batch, so variants
/// carry owned strings and the whole enum is cheaply cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    /// The batcher is shutting down and no longer admits requests
    #[error("batcher is shutting down")]
    Shutdown,

    /// The batch request could not be encoded
    #[error("failed to encode batch request: {0}")]
    Encode(String),

    /// The network round-trip to the model server failed
    #[error("model server request failed: {0}")]
    Transport(String),

    /// The model server answered with a non-success status
    #[error("model server returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The model server reply could not be decoded
    #[error("invalid model server response: {0}")]
    Decode(String),

    /// The model server reported an error for this request only
    #[error("{0}")]
    Backend(String),

    /// The model server reply contained no entry for this request id
    #[error("response not found for request")]
    ResponseNotFound,
}

/// One inference result: the correlation id plus either the raw result
/// payload or the error, never both.
#[derive(Debug)]
pub struct Response {
    /// Correlation id of the request this response answers
    pub id: Uuid,
    /// The raw result payload, or the failure
    pub result: Result<Box<RawValue>, BatchError>,
}

impl Response {
    /// A successful response carrying the given payload
    pub fn ok(id: Uuid, data: Box<RawValue>) -> Self {
        Self { id, result: Ok(data) }
    }

    /// A failed response
    pub fn err(id: Uuid, error: BatchError) -> Self {
        Self { id, result: Err(error) }
    }
}

/// A single in-flight inference request waiting to be batched.
///
/// The reply slot is a oneshot channel: the batcher writes it exactly once
/// and the sender is consumed by the write, so a second reply is impossible.
/// If the submitting caller has already given up, the write fails and the
/// response is discarded.
#[derive(Debug)]
pub struct Request {
    /// Correlation id, unique across all in-flight requests
    pub id: Uuid,
    /// Opaque JSON payload forwarded to the model server untouched
    pub payload: Box<RawValue>,
    pub(crate) reply: oneshot::Sender<Response>,
}

impl Request {
    /// Create a request and the receiving half of its reply slot.
    pub fn new(id: Uuid, payload: Box<RawValue>) -> (Self, oneshot::Receiver<Response>) {
        let (reply, rx) = oneshot::channel();
        (Self { id, payload, reply }, rx)
    }
}

/// An ordered, closed collection of requests dispatched together.
///
/// Order is formation order, which is admission order. A batch is never
/// empty and never exceeds the configured maximum size.
#[derive(Debug, Default)]
pub struct Batch {
    pub requests: Vec<Request>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { requests: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
