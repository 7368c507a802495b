//! Application state shared across HTTP handlers.

use std::time::Instant;

use crate::batcher::Batcher;

/// State handed to every route handler
pub struct AppState {
    /// The batching engine
    pub batcher: Batcher,

    /// Process start time, for the uptime report
    pub started_at: Instant,
}

impl AppState {
    pub fn new(batcher: Batcher) -> Self {
        Self { batcher, started_at: Instant::now() }
    }
}
