//! Batch formation and response routing.
//!
//! A single collector task owns the consumer side of the admission queue.
//! It fills one batch at a time, closing it when the batch reaches the
//! configured size or when the batch timer fires, whichever comes first,
//! then hands the batch to the dispatcher and fans the responses back out
//! to the waiting callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::value::RawValue;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::metrics::BatcherMetrics;
use super::request::{Batch, BatchError, Request, Response};
use crate::metrics;

/// Admission queue capacity as a multiple of the batch size. Anything >= 2
/// is correct; 10 smooths arrival bursts without holding much memory.
const QUEUE_CAPACITY_FACTOR: usize = 10;

/// Executes one closed batch against the backend.
///
/// Implementations must return one response per request on the happy path
/// and synthesize per-request errors on failure; the worker fills in a
/// routing-miss error for any request left unanswered.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, batch: &Batch) -> Vec<Response>;
}

/// Handle to the batching engine.
///
/// Cheap to share behind an `Arc`; all ingress handlers submit through the
/// same handle while a single background task forms and dispatches batches.
pub struct Batcher {
    tx: mpsc::Sender<Request>,
    stop: watch::Sender<bool>,
    metrics: Arc<BatcherMetrics>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    /// Spawn the collector task and return the handle.
    pub fn start(
        max_batch_size: usize,
        timeout: Duration,
        dispatcher: Arc<dyn Dispatch>,
    ) -> Self {
        let capacity = max_batch_size.saturating_mul(QUEUE_CAPACITY_FACTOR).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (stop, stop_rx) = watch::channel(false);
        let metrics = Arc::new(BatcherMetrics::new());

        let worker = BatchWorker {
            rx,
            stop: stop_rx,
            max_batch_size,
            timeout,
            dispatcher,
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run());

        info!(
            max_batch_size,
            timeout_ms = timeout.as_millis() as u64,
            "batcher started"
        );

        Self { tx, stop, metrics, worker: Mutex::new(Some(handle)) }
    }

    /// Submit one request and wait for its response.
    ///
    /// Suspends on the admission queue when it is full and then on the
    /// reply slot until the batch carrying this request has been
    /// dispatched. Dropping the returned future (e.g. through a caller
    /// deadline) cancels cleanly at either point: before admission the
    /// request is never seen by the collector, after admission the batch
    /// proceeds and the reply is discarded.
    pub async fn submit(
        &self,
        id: Uuid,
        payload: Box<RawValue>,
    ) -> Result<Box<RawValue>, BatchError> {
        let (request, reply) = Request::new(id, payload);

        self.tx.send(request).await.map_err(|_| BatchError::Shutdown)?;

        match reply.await {
            Ok(response) => response.result,
            // Collector went away without answering; only happens mid-shutdown.
            Err(_) => Err(BatchError::Shutdown),
        }
    }

    /// Batch totals for the health endpoint.
    pub fn metrics(&self) -> &BatcherMetrics {
        &self.metrics
    }

    /// Stop admitting requests, dispatch everything already queued, and
    /// wait for the collector to finish.
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }
        info!("batcher stopped");
    }
}

/// Outcome of one collection cycle.
enum Collected {
    /// A closed batch; keep collecting afterwards.
    Batch(Batch),
    /// Stop was signaled, possibly with a partial batch to flush first.
    Stopping(Option<Batch>),
}

/// The single collector task. Owns the queue consumer exclusively.
struct BatchWorker {
    rx: mpsc::Receiver<Request>,
    stop: watch::Receiver<bool>,
    max_batch_size: usize,
    timeout: Duration,
    dispatcher: Arc<dyn Dispatch>,
    metrics: Arc<BatcherMetrics>,
}

impl BatchWorker {
    async fn run(mut self) {
        loop {
            match self.collect().await {
                Collected::Batch(batch) => self.dispatch_and_route(batch).await,
                Collected::Stopping(partial) => {
                    // No further admissions; queued requests stay drainable.
                    self.rx.close();
                    if let Some(batch) = partial {
                        self.dispatch_and_route(batch).await;
                    }
                    self.drain().await;
                    return;
                }
            }
        }
    }

    /// Collect one batch: block for the first request, then fill until the
    /// size cap or until the batch timer expires. The timer is armed when
    /// the first request arrives, bounding the oldest request's wait to the
    /// configured timeout regardless of later arrivals.
    async fn collect(&mut self) -> Collected {
        let first = tokio::select! {
            request = self.rx.recv() => match request {
                Some(request) => request,
                None => return Collected::Stopping(None),
            },
            _ = self.stop.changed() => return Collected::Stopping(None),
        };

        let mut batch = Batch::with_capacity(self.max_batch_size);
        batch.push(first);

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        while batch.len() < self.max_batch_size {
            // Biased: an arrival that fills the batch wins over a timer
            // expiring in the same instant, so it is never split off into
            // the next batch.
            tokio::select! {
                biased;
                request = self.rx.recv() => match request {
                    Some(request) => batch.push(request),
                    None => return Collected::Stopping(Some(batch)),
                },
                _ = &mut deadline => return Collected::Batch(batch),
                _ = self.stop.changed() => return Collected::Stopping(Some(batch)),
            }
        }

        Collected::Batch(batch)
    }

    /// Flush whatever is still queued at shutdown into final size-bounded
    /// batches, so every admitted request gets exactly one reply.
    async fn drain(&mut self) {
        let mut batch = Batch::with_capacity(self.max_batch_size);
        while let Some(request) = self.rx.recv().await {
            batch.push(request);
            if batch.len() == self.max_batch_size {
                self.dispatch_and_route(std::mem::replace(
                    &mut batch,
                    Batch::with_capacity(self.max_batch_size),
                ))
                .await;
            }
        }
        if !batch.is_empty() {
            self.dispatch_and_route(batch).await;
        }
    }

    /// Hand a closed batch to the dispatcher, route responses back by id,
    /// and update the batch totals.
    async fn dispatch_and_route(&self, batch: Batch) {
        let batch_size = batch.len();
        debug!(batch_size, "dispatching batch");

        let responses = self.dispatcher.dispatch(&batch).await;

        let mut by_id: HashMap<Uuid, Response> =
            responses.into_iter().map(|response| (response.id, response)).collect();

        for request in batch.requests {
            let response = by_id
                .remove(&request.id)
                .unwrap_or_else(|| Response::err(request.id, BatchError::ResponseNotFound));
            // Fails only if the caller gave up waiting; the result is
            // discarded in that case.
            let _ = request.reply.send(response);
        }

        let snapshot = self.metrics.record_batch(batch_size);
        metrics::observe_batch(batch_size, snapshot.avg_batch_size);
    }
}
