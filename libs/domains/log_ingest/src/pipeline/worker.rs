//! Partition worker: embed, deduplicate, batch and flush.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use super::batch::BatchAccumulator;
use super::config::PipelineConfig;
use crate::dedup::{Decision, SimilarityDeduplicator};
use crate::embedding::EmbeddingClient;
use crate::error::IngestError;
use crate::metrics::IngestMetrics;
use crate::models::{EmbeddedRecord, LogRecord};
use crate::retry::{RetryConfig, retry_if};
use crate::storage::VectorStore;

/// Hard stop published by the pipeline once shutdown begins.
pub(crate) struct ShutdownDeadline {
    rx: watch::Receiver<Option<Instant>>,
}

impl ShutdownDeadline {
    pub(crate) fn new(rx: watch::Receiver<Option<Instant>>) -> Self {
        Self { rx }
    }

    /// Resolves once a deadline has been published and has passed.
    async fn reached(&mut self) {
        loop {
            let current = *self.rx.borrow_and_update();
            if let Some(at) = current {
                sleep_until(at).await;
                return;
            }
            if self.rx.changed().await.is_err() {
                // Publisher gone without a deadline: nothing will ever stop us from here.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Run `fut` unless the deadline passes first.
    async fn bounded<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.reached() => None,
            out = fut => Some(out),
        }
    }
}

enum Flow {
    Continue,
    Closed,
    DeadlineReached,
}

pub(crate) struct Worker {
    id: usize,
    rx: mpsc::Receiver<LogRecord>,
    deadline: ShutdownDeadline,
    embedder: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    metrics: Arc<IngestMetrics>,
    dedup: SimilarityDeduplicator,
    batch: BatchAccumulator,
    flush_retry: RetryConfig,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        rx: mpsc::Receiver<LogRecord>,
        deadline: ShutdownDeadline,
        config: &PipelineConfig,
        embedder: Arc<EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            id,
            rx,
            deadline,
            embedder,
            store,
            metrics,
            dedup: SimilarityDeduplicator::new(config.dedup.clone()),
            batch: BatchAccumulator::new(config.max_batch_size, config.max_batch_timeout),
            flush_retry: config.flush_retry.clone(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(worker = self.id, "Worker started");

        loop {
            let flush_at = self.batch.deadline();

            let flow = tokio::select! {
                biased;
                _ = self.deadline.reached() => Flow::DeadlineReached,
                _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                    self.flush().await
                }
                msg = self.rx.recv() => match msg {
                    Some(record) => self.handle(record).await,
                    None => match self.flush().await {
                        Flow::DeadlineReached => Flow::DeadlineReached,
                        _ => Flow::Closed,
                    },
                },
            };

            match flow {
                Flow::Continue => {}
                Flow::Closed => {
                    info!(worker = self.id, "Queue drained, worker stopped");
                    return;
                }
                Flow::DeadlineReached => {
                    self.abandon();
                    return;
                }
            }
        }
    }

    async fn handle(&mut self, record: LogRecord) -> Flow {
        let embedder = Arc::clone(&self.embedder);

        // The pending batch keeps its age limit while a slow embed is in flight.
        let embedded = {
            let embed = embedder.embed(record.message());
            tokio::pin!(embed);
            loop {
                let flush_at = self.batch.deadline();
                tokio::select! {
                    biased;
                    _ = self.deadline.reached() => break None,
                    _ = sleep_until(flush_at.unwrap_or_else(Instant::now)), if flush_at.is_some() => {
                        if let Flow::DeadlineReached = self.flush().await {
                            break None;
                        }
                    }
                    out = &mut embed => break Some(out),
                }
            }
        };

        let vector = match embedded {
            None => {
                self.metrics.records_dropped(1);
                return Flow::DeadlineReached;
            }
            Some(Ok(vector)) => vector,
            Some(Err(e)) => {
                self.metrics.embedding_failure();
                warn!(
                    worker = self.id,
                    source = record.source(),
                    kind = e.kind(),
                    error = %e,
                    "Dropping record, embedding failed"
                );
                return Flow::Continue;
            }
        };

        if self.dedup.consider(record.source(), &vector) == Decision::Suppress {
            self.metrics.duplicate_suppressed();
            debug!(worker = self.id, source = record.source(), "Suppressed near-duplicate");
            return Flow::Continue;
        }

        if self.batch.push(EmbeddedRecord::new(record, vector)) {
            return self.flush().await;
        }

        Flow::Continue
    }

    async fn flush(&mut self) -> Flow {
        let Some(batch) = self.batch.take() else {
            return Flow::Continue;
        };

        let started = std::time::Instant::now();
        let store = &self.store;
        let metrics = &self.metrics;
        let pending = &batch;
        let mut attempts = 0u32;

        let write = retry_if(
            || {
                attempts += 1;
                if attempts > 1 {
                    metrics.storage_retry();
                }
                store.insert_batch(pending)
            },
            &self.flush_retry,
            IngestError::is_transient,
        );

        let flow = match self.deadline.bounded(write).await {
            Some(Ok(())) => {
                self.metrics.batch_flushed(batch.len(), started.elapsed());
                debug!(
                    worker = self.id,
                    batch_size = batch.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch flushed"
                );
                Flow::Continue
            }
            Some(Err(e)) => {
                self.metrics.batch_dropped(batch.len());
                error!(
                    worker = self.id,
                    batch_size = batch.len(),
                    attempts,
                    error = %e,
                    "Dropping batch, storage write failed"
                );
                Flow::Continue
            }
            None => {
                self.metrics.batch_dropped(batch.len());
                warn!(
                    worker = self.id,
                    batch_size = batch.len(),
                    "Shutdown deadline reached during flush, batch dropped"
                );
                Flow::DeadlineReached
            }
        };

        self.dedup.prune(std::time::Instant::now());
        flow
    }

    /// Count everything still held by this worker as lost.
    fn abandon(&mut self) {
        let pending = self.batch.take().map(|b| b.len()).unwrap_or(0);
        if pending > 0 {
            self.metrics.batch_dropped(pending);
        }

        self.rx.close();
        let mut queued = 0;
        while self.rx.try_recv().is_ok() {
            queued += 1;
        }
        self.metrics.records_dropped(queued);

        warn!(
            worker = self.id,
            batch_records = pending,
            queued_records = queued,
            "Shutdown deadline reached, worker abandoned remaining records"
        );
    }
}
