//! Request batching engine.
//!
//! Individual prediction requests are coalesced into size- and time-bounded
//! batches so the model server is invoked once per batch instead of once per
//! request.
//!
//! ```text
//! ingress ──► admission queue ──► collector ──► dispatcher ──► model server
//!    ▲                              (single task)                   │
//!    └────────── reply slots ◄──────── router ◄─────────────────────┘
//! ```
//!
//! A batch closes on whichever fires first: the size cap or a timer armed
//! when the batch's first request arrives. Dispatch is strictly serial; at
//! most one batch is in flight at any time.

mod metrics;
mod request;
mod worker;

pub use metrics::{BatcherMetrics, MetricsSnapshot};
pub use request::{Batch, BatchError, Request, Response};
pub use worker::{Batcher, Dispatch};
