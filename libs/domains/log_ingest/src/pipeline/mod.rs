//! Partitioned worker pool between the ingestion endpoint and storage.
//!
//! ```text
//!                 hash(source) % N
//! enqueue ──────┬──────────────────► [mpsc 0] ─► worker 0 ─┐
//!               ├──────────────────► [mpsc 1] ─► worker 1 ─┼─► VectorStore::insert_batch
//!               └──────────────────► [mpsc N] ─► worker N ─┘
//! ```
//!
//! Every record from one source lands on the same worker, so each worker owns
//! its deduplication windows outright.

mod batch;
mod config;
mod worker;

pub use batch::BatchAccumulator;
pub use config::PipelineConfig;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{error, info, warn};

use crate::embedding::EmbeddingClient;
use crate::error::{IngestError, IngestResult};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::models::LogRecord;
use crate::storage::VectorStore;
use worker::{ShutdownDeadline, Worker};

/// Grace period past the shutdown deadline before workers are aborted.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Counters at the end of shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub counters: MetricsSnapshot,
    /// Workers that missed the deadline and were aborted
    pub aborted_workers: usize,
    pub elapsed: Duration,
}

struct HandleInner {
    senders: RwLock<Option<Vec<mpsc::Sender<LogRecord>>>>,
    enqueue_timeout: Duration,
}

/// Cloneable producer side of the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    inner: Arc<HandleInner>,
}

impl PipelineHandle {
    /// Queue a record for its partition, waiting at most the configured enqueue timeout.
    pub async fn enqueue(&self, record: LogRecord) -> IngestResult<()> {
        let sender = {
            let guard = self
                .inner
                .senders
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match guard.as_ref() {
                Some(senders) if !senders.is_empty() => {
                    senders[partition(record.source(), senders.len())].clone()
                }
                _ => return Err(IngestError::ShuttingDown),
            }
        };

        match sender
            .send_timeout(record, self.inner.enqueue_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(IngestError::QueueFull),
            Err(SendTimeoutError::Closed(_)) => Err(IngestError::ShuttingDown),
        }
    }

    /// Stop accepting records. Queued records are still processed.
    pub fn close(&self) {
        let mut guard = self
            .inner
            .senders
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            info!("Pipeline closed to new records");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.inner
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Worker index for a stream key.
fn partition(source: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}

/// Owner of the worker tasks.
pub struct IngestPipeline {
    handle: PipelineHandle,
    workers: JoinSet<()>,
    deadline_tx: watch::Sender<Option<Instant>>,
    shutdown_timeout: Duration,
    metrics: Arc<IngestMetrics>,
}

impl IngestPipeline {
    /// Validate `config` and spawn one worker per partition.
    pub fn start(
        config: PipelineConfig,
        embedder: Arc<EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        metrics: Arc<IngestMetrics>,
    ) -> IngestResult<Self> {
        config.validate()?;

        let (deadline_tx, deadline_rx) = watch::channel(None);
        let capacity = config.per_worker_capacity();
        let mut senders = Vec::with_capacity(config.workers);
        let mut workers = JoinSet::new();

        for id in 0..config.workers {
            let (tx, rx) = mpsc::channel(capacity);
            senders.push(tx);

            let worker = Worker::new(
                id,
                rx,
                ShutdownDeadline::new(deadline_rx.clone()),
                &config,
                embedder.clone(),
                store.clone(),
                metrics.clone(),
            );
            workers.spawn(worker.run());
        }

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            max_batch_size = config.max_batch_size,
            batch_timeout_ms = config.max_batch_timeout.as_millis() as u64,
            similarity_threshold = config.dedup.threshold,
            min_examples = config.dedup.min_examples,
            "Ingest pipeline started"
        );

        Ok(Self {
            handle: PipelineHandle {
                inner: Arc::new(HandleInner {
                    senders: RwLock::new(Some(senders)),
                    enqueue_timeout: config.enqueue_timeout,
                }),
            },
            workers,
            deadline_tx,
            shutdown_timeout: config.shutdown_timeout,
            metrics,
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting, let workers drain and flush within the shutdown timeout,
    /// then abort whatever is still running.
    pub async fn shutdown(mut self) -> ShutdownReport {
        let started = Instant::now();
        self.handle.close();

        let deadline = started + self.shutdown_timeout;
        self.deadline_tx.send_replace(Some(deadline));
        info!(
            timeout_secs = self.shutdown_timeout.as_secs_f64(),
            "Draining ingest pipeline"
        );

        let mut aborted_workers = 0;
        loop {
            match timeout_at(deadline + ABORT_GRACE, self.workers.join_next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => error!(error = %e, "Worker task failed"),
                Ok(None) => break,
                Err(_) => {
                    aborted_workers = self.workers.len();
                    error!(
                        remaining = aborted_workers,
                        "Workers still running past the shutdown deadline, aborting"
                    );
                    self.workers.abort_all();
                    while self.workers.join_next().await.is_some() {}
                    break;
                }
            }
        }

        let report = ShutdownReport {
            counters: self.metrics.snapshot(),
            aborted_workers,
            elapsed: started.elapsed(),
        };

        if report.counters.batches_dropped > 0 || report.counters.records_dropped > 0 {
            warn!(
                batches_dropped = report.counters.batches_dropped,
                records_dropped = report.counters.records_dropped,
                "Pipeline stopped with data loss"
            );
        }
        info!(
            records_stored = report.counters.records_stored,
            batches_flushed = report.counters.batches_flushed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Ingest pipeline stopped"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupConfig;
    use crate::embedding::{EmbeddingProvider, MockEmbeddingProvider};
    use crate::retry::RetryConfig;
    use crate::storage::MockVectorStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DIM: usize = 256;

    /// One-hot vector keyed by the number at the end of the message.
    fn one_hot(text: &str) -> Vec<f32> {
        let idx: usize = text
            .rsplit(' ')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let mut v = vec![0.0; DIM];
        v[idx % DIM] = 1.0;
        v
    }

    fn embedder(mock: MockEmbeddingProvider) -> Arc<EmbeddingClient> {
        Arc::new(
            EmbeddingClient::new(Arc::new(mock), DIM)
                .with_retry(RetryConfig::new().with_initial_delay(1).without_jitter()),
        )
    }

    fn one_hot_provider() -> MockEmbeddingProvider {
        let mut mock = MockEmbeddingProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_embed().returning(|text| Ok(one_hot(text)));
        mock
    }

    /// Store that records the size of every batch it accepts.
    fn recording_store(sizes: Arc<Mutex<Vec<usize>>>) -> MockVectorStore {
        let mut store = MockVectorStore::new();
        store.expect_insert_batch().returning(move |batch| {
            sizes.lock().unwrap().push(batch.len());
            Ok(())
        });
        store
    }

    fn record(source: &str, message: impl Into<String>) -> LogRecord {
        LogRecord::new(Utc::now(), message, source)
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new()
            .with_workers(2)
            .with_queue_capacity(1000)
            .with_enqueue_timeout(Duration::from_secs(1))
            .with_max_batch_size(100)
            .with_max_batch_timeout(Duration::from_secs(60))
            .with_flush_retry(RetryConfig::new().with_initial_delay(1).without_jitter())
            .with_shutdown_timeout(Duration::from_secs(5))
    }

    async fn wait_for(metrics: &IngestMetrics, check: impl Fn(&MetricsSnapshot) -> bool) {
        for _ in 0..200 {
            if check(&metrics.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached: {:?}", metrics.snapshot());
    }

    #[test]
    fn test_partition_is_deterministic() {
        for workers in 1..8 {
            let p = partition("api", workers);
            assert!(p < workers);
            assert_eq!(p, partition("api", workers));
        }
    }

    #[tokio::test]
    async fn test_size_flush_then_remainder_on_close() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config().with_workers(1),
            embedder(one_hot_provider()),
            Arc::new(recording_store(sizes.clone())),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        for i in 0..150 {
            handle.enqueue(record("svc", format!("event {}", i))).await.unwrap();
        }

        let report = pipeline.shutdown().await;
        assert_eq!(*sizes.lock().unwrap(), vec![100, 50]);
        assert_eq!(report.counters.records_stored, 150);
        assert_eq!(report.counters.batches_flushed, 2);
        assert_eq!(report.counters.records_dropped, 0);
        assert_eq!(report.aborted_workers, 0);
    }

    #[tokio::test]
    async fn test_identical_records_suppressed_after_min_examples() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config().with_dedup(DedupConfig::default().with_min_examples(3)),
            embedder(one_hot_provider()),
            Arc::new(recording_store(sizes.clone())),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        for _ in 0..150 {
            handle.enqueue(record("svc", "disk full 7")).await.unwrap();
        }

        let report = pipeline.shutdown().await;
        assert_eq!(*sizes.lock().unwrap(), vec![3]);
        assert_eq!(report.counters.duplicates_suppressed, 147);
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config().with_max_batch_timeout(Duration::from_millis(50)),
            embedder(one_hot_provider()),
            Arc::new(recording_store(sizes.clone())),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        for i in 0..3 {
            handle.enqueue(record("svc", format!("event {}", i))).await.unwrap();
        }

        wait_for(&metrics, |s| s.records_stored == 3).await;
        assert_eq!(*sizes.lock().unwrap(), vec![3]);

        pipeline.shutdown().await;
        // Nothing left to flush on close; no empty batch is written.
        assert_eq!(*sizes.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_failing_store_drops_each_batch_once_and_continues() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut store = MockVectorStore::new();
        store.expect_insert_batch().returning(move |_| {
            if calls_clone.fetch_add(1, Ordering::SeqCst) < 3 {
                Err(IngestError::StorageWrite("connection reset".into()))
            } else {
                Ok(())
            }
        });

        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config()
                .with_workers(1)
                .with_max_batch_size(2)
                .with_flush_retry(
                    RetryConfig::new()
                        .with_max_retries(2)
                        .with_initial_delay(1)
                        .without_jitter(),
                ),
            embedder(one_hot_provider()),
            Arc::new(store),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        for i in 0..4 {
            handle.enqueue(record("svc", format!("event {}", i))).await.unwrap();
        }

        let report = pipeline.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(report.counters.batches_dropped, 1);
        assert_eq!(report.counters.records_dropped, 2);
        assert_eq!(report.counters.storage_retries, 2);
        assert_eq!(report.counters.batches_flushed, 1);
        assert_eq!(report.counters.records_stored, 2);
    }

    #[tokio::test]
    async fn test_embedding_failures_drop_only_that_record() {
        let mut provider = MockEmbeddingProvider::new();
        provider.expect_name().return_const("mock");
        provider.expect_embed().returning(|text| {
            if text.contains("poison") {
                Err(IngestError::EmbeddingRejected("400".into()))
            } else {
                Ok(one_hot(text))
            }
        });

        let sizes = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config().with_workers(1),
            embedder(provider),
            Arc::new(recording_store(sizes.clone())),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        handle.enqueue(record("svc", "event 1")).await.unwrap();
        handle.enqueue(record("svc", "poison 2")).await.unwrap();
        handle.enqueue(record("svc", "event 3")).await.unwrap();

        let report = pipeline.shutdown().await;
        assert_eq!(report.counters.embedding_failures, 1);
        assert_eq!(*sizes.lock().unwrap(), vec![2]);
    }

    struct StalledProvider;

    #[async_trait]
    impl EmbeddingProvider for StalledProvider {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn embed(&self, _text: &str) -> IngestResult<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![0.0; DIM])
        }

        async fn health_check(&self) -> IngestResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stalled_consumer_rejects_within_bounded_wait() {
        let embedder = Arc::new(
            EmbeddingClient::new(Arc::new(StalledProvider), DIM)
                .with_timeout(Duration::from_secs(3600)),
        );
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config()
                .with_workers(1)
                .with_queue_capacity(2)
                .with_enqueue_timeout(Duration::from_millis(50))
                .with_shutdown_timeout(Duration::from_millis(100)),
            embedder,
            Arc::new(MockVectorStore::new()),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        let mut rejected = 0;
        for i in 0..10 {
            let started = std::time::Instant::now();
            match handle.enqueue(record("svc", format!("event {}", i))).await {
                Ok(()) => {}
                Err(IngestError::QueueFull) => rejected += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
            assert!(started.elapsed() < Duration::from_secs(1));
        }
        assert!(rejected >= 7, "rejected {}", rejected);

        let report = pipeline.shutdown().await;
        assert_eq!(report.aborted_workers, 0);
        assert_eq!(report.counters.records_dropped, 10 - rejected as u64);
        assert!(report.elapsed < Duration::from_secs(2));
    }

    /// Embeds "slow ..." messages only after a long pause.
    struct SlowProvider {
        finished: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn embed(&self, text: &str) -> IngestResult<Vec<f32>> {
            if text.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(800)).await;
                self.finished.store(true, Ordering::SeqCst);
            }
            Ok(one_hot(text))
        }

        async fn health_check(&self) -> IngestResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timer_flushes_partial_batch_during_slow_embed() {
        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let embedder = Arc::new(
            EmbeddingClient::new(
                Arc::new(SlowProvider {
                    finished: finished.clone(),
                }),
                DIM,
            )
            .with_timeout(Duration::from_secs(5)),
        );
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config()
                .with_workers(1)
                .with_max_batch_timeout(Duration::from_millis(50)),
            embedder,
            Arc::new(recording_store(sizes.clone())),
            metrics.clone(),
        )
        .unwrap();

        let started = std::time::Instant::now();
        let handle = pipeline.handle();
        handle.enqueue(record("svc", "event 1")).await.unwrap();
        handle.enqueue(record("svc", "slow 2")).await.unwrap();

        wait_for(&metrics, |s| s.records_stored == 1).await;
        assert!(!finished.load(Ordering::SeqCst), "flush waited for the slow embed");
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(*sizes.lock().unwrap(), vec![1]);

        let report = pipeline.shutdown().await;
        assert_eq!(*sizes.lock().unwrap(), vec![1, 1]);
        assert_eq!(report.counters.records_stored, 2);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_mid_batch_and_rejects_new_records() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let metrics = Arc::new(IngestMetrics::new());
        let pipeline = IngestPipeline::start(
            config(),
            embedder(one_hot_provider()),
            Arc::new(recording_store(sizes.clone())),
            metrics.clone(),
        )
        .unwrap();

        let handle = pipeline.handle();
        for i in 0..5 {
            handle.enqueue(record("svc", format!("event {}", i))).await.unwrap();
        }
        assert!(handle.is_accepting());

        let report = pipeline.shutdown().await;
        assert_eq!(*sizes.lock().unwrap(), vec![5]);
        assert_eq!(report.counters.records_stored, 5);

        assert!(!handle.is_accepting());
        assert!(matches!(
            handle.enqueue(record("svc", "late 1")).await,
            Err(IngestError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let result = IngestPipeline::start(
            config().with_max_batch_size(0),
            embedder(one_hot_provider()),
            Arc::new(MockVectorStore::new()),
            Arc::new(IngestMetrics::new()),
        );
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}
