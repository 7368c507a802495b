//! Prometheus metrics for the inference proxy.

mod prometheus;

pub use prometheus::{encode_metrics, observe_batch, register_metrics};
