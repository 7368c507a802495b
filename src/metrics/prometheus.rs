//! Prometheus registry and text exposition.
//!
//! The batcher records into these after every batch closure; `GET /metrics`
//! renders the registry in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{Gauge, IntCounter, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry for proxy metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// Total number of inference requests
    pub static ref REQUESTS_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("requests_total", "Total number of inference requests")
            .namespace("nexus_proxy")
    ).expect("metric can be created");

    /// Total number of batches processed
    pub static ref BATCHES_TOTAL: IntCounter = IntCounter::with_opts(
        Opts::new("batches_total", "Total number of batches processed")
            .namespace("nexus_proxy")
    ).expect("metric can be created");

    /// Average batch size
    pub static ref BATCH_SIZE_AVG: Gauge = Gauge::with_opts(
        Opts::new("batch_size_avg", "Average batch size")
            .namespace("nexus_proxy")
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCHES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE_AVG.clone()))?;
    Ok(())
}

/// Record one dispatched batch.
pub fn observe_batch(batch_size: usize, avg_batch_size: f64) {
    REQUESTS_TOTAL.inc_by(batch_size as u64);
    BATCHES_TOTAL.inc();
    BATCH_SIZE_AVG.set(avg_batch_size);
}

/// Encode all registered metrics to the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_batch() {
        // The registry is process-global and other tests record into it
        // concurrently, so only monotonic assertions are safe here.
        let requests_before = REQUESTS_TOTAL.get();
        let batches_before = BATCHES_TOTAL.get();
        observe_batch(4, 4.0);
        assert!(REQUESTS_TOTAL.get() >= requests_before + 4);
        assert!(BATCHES_TOTAL.get() >= batches_before + 1);
    }

    #[test]
    fn test_encode_after_register() {
        // Registering twice across tests is fine to ignore; encoding must
        // carry the namespaced metric names either way.
        let _ = register_metrics();
        observe_batch(2, 2.0);

        let output = encode_metrics();
        assert!(output.contains("nexus_proxy_requests_total"));
        assert!(output.contains("nexus_proxy_batches_total"));
        assert!(output.contains("nexus_proxy_batch_size_avg"));
    }
}
