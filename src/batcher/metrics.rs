//! Batch accounting for the batcher.

use std::sync::RwLock;

/// Monotonic batch totals, updated by the worker after every batch closure
/// and read by the health endpoint.
///
/// The lock wraps counter arithmetic only and is never held across an await.
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    totals: RwLock<Totals>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    total_requests: u64,
    total_batches: u64,
    avg_batch_size: f64,
}

/// Point-in-time view of the batch totals
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_batches: u64,
    pub avg_batch_size: f64,
}

impl BatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dispatched batch of the given size and return the updated
    /// totals.
    pub fn record_batch(&self, batch_size: usize) -> MetricsSnapshot {
        let mut totals = self.totals.write().expect("metrics lock poisoned");
        totals.total_requests += batch_size as u64;
        totals.total_batches += 1;
        totals.avg_batch_size = totals.total_requests as f64 / totals.total_batches as f64;
        MetricsSnapshot {
            total_requests: totals.total_requests,
            total_batches: totals.total_batches,
            avg_batch_size: totals.avg_batch_size,
        }
    }

    /// Snapshot the current totals.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = self.totals.read().expect("metrics lock poisoned");
        MetricsSnapshot {
            total_requests: totals.total_requests,
            total_batches: totals.total_batches,
            avg_batch_size: totals.avg_batch_size,
        }
    }
}
