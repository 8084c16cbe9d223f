//! Prometheus metrics for the ingest pipeline
//!
//! [`IngestMetrics`] keeps its own atomic counters so tests and the `/stats`
//! endpoint can read exact values, and mirrors every increment into the
//! `metrics` facade for Prometheus export.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() -> Result<(), BuildError> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            let handle = PrometheusBuilder::new().install_recorder()?;
            info!("Prometheus metrics initialized");
            Ok(handle)
        })
        .map(|_| ())
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Outcome label for `log_ingest_requests_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Accepted,
    Partial,
    Backpressure,
    ShuttingDown,
    Malformed,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Accepted => "accepted",
            RequestOutcome::Partial => "partial",
            RequestOutcome::Backpressure => "backpressure",
            RequestOutcome::ShuttingDown => "shutting_down",
            RequestOutcome::Malformed => "malformed",
        }
    }
}

/// Counter registry shared by the endpoint and the workers.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    requests: AtomicU64,
    records_accepted: AtomicU64,
    records_rejected: AtomicU64,
    embedding_failures: AtomicU64,
    duplicates_suppressed: AtomicU64,
    batches_flushed: AtomicU64,
    records_stored: AtomicU64,
    batches_dropped: AtomicU64,
    records_dropped: AtomicU64,
    storage_retries: AtomicU64,
}

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub records_accepted: u64,
    pub records_rejected: u64,
    pub embedding_failures: u64,
    pub duplicates_suppressed: u64,
    pub batches_flushed: u64,
    pub records_stored: u64,
    pub batches_dropped: u64,
    pub records_dropped: u64,
    pub storage_retries: u64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self, outcome: RequestOutcome) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        counter!("log_ingest_requests_total", "outcome" => outcome.as_str()).increment(1);
    }

    pub fn records_accepted(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.records_accepted
            .fetch_add(count as u64, Ordering::Relaxed);
        counter!("log_ingest_records_accepted_total").increment(count as u64);
    }

    /// Record one rejected request line, labeled by [`crate::IngestError::kind`].
    pub fn record_rejected(&self, reason: &'static str) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
        counter!("log_ingest_records_rejected_total", "reason" => reason).increment(1);
    }

    pub fn embedding_failure(&self) {
        self.embedding_failures.fetch_add(1, Ordering::Relaxed);
        counter!("log_ingest_embedding_failures_total").increment(1);
    }

    pub fn duplicate_suppressed(&self) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
        counter!("log_ingest_duplicates_suppressed_total").increment(1);
    }

    pub fn batch_flushed(&self, records: usize, duration: Duration) {
        self.batches_flushed.fetch_add(1, Ordering::Relaxed);
        self.records_stored
            .fetch_add(records as u64, Ordering::Relaxed);

        counter!("log_ingest_batches_flushed_total").increment(1);
        counter!("log_ingest_records_stored_total").increment(records as u64);
        histogram!("log_ingest_batch_size").record(records as f64);
        histogram!("log_ingest_flush_duration_seconds").record(duration.as_secs_f64());
    }

    /// Count one lost batch and the records it held.
    pub fn batch_dropped(&self, records: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        counter!("log_ingest_batches_dropped_total").increment(1);
        self.records_dropped(records);
    }

    /// Count records lost outside of any batch (e.g. queued at the shutdown deadline).
    pub fn records_dropped(&self, records: usize) {
        if records == 0 {
            return;
        }
        self.records_dropped
            .fetch_add(records as u64, Ordering::Relaxed);
        counter!("log_ingest_records_dropped_total").increment(records as u64);
    }

    pub fn storage_retry(&self) {
        self.storage_retries.fetch_add(1, Ordering::Relaxed);
        counter!("log_ingest_storage_retries_total").increment(1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            records_accepted: self.records_accepted.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            records_stored: self.records_stored.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            storage_retries: self.storage_retries.load(Ordering::Relaxed),
        }
    }
}
