//! HTTP route handlers for the inference proxy.
//!
//! - `predict`: the single-request prediction endpoint (batched internally)
//! - `health`: health, readiness and metrics endpoints

pub mod health;
pub mod predict;

pub use health::{health, metrics, ready};
pub use predict::predict;
