//! Pipeline configuration
//!
//! This module provides `PipelineConfig` for sizing the worker pool and its batches.

use std::time::Duration;

use crate::dedup::DedupConfig;
use crate::error::{IngestError, IngestResult};
use crate::retry::RetryConfig;

/// Configuration for the worker pool and batcher
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of partitioned workers
    pub workers: usize,

    /// Total inbound queue capacity, split evenly across workers
    pub queue_capacity: usize,

    /// Longest an enqueue waits for queue space before reporting backpressure
    pub enqueue_timeout: Duration,

    /// Records per batch; reaching it flushes immediately
    pub max_batch_size: usize,

    /// Longest a non-empty batch waits before it is flushed
    pub max_batch_timeout: Duration,

    /// Backoff for storage writes
    pub flush_retry: RetryConfig,

    /// Time allowed for draining and flushing after shutdown begins
    pub shutdown_timeout: Duration,

    pub dedup: DedupConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: 10_000,
            enqueue_timeout: Duration::from_millis(100),
            max_batch_size: 100,
            max_batch_timeout: Duration::from_secs(5),
            flush_retry: RetryConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            dedup: DedupConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_enqueue_timeout(mut self, timeout: Duration) -> Self {
        self.enqueue_timeout = timeout;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_batch_timeout(mut self, timeout: Duration) -> Self {
        self.max_batch_timeout = timeout;
        self
    }

    pub fn with_flush_retry(mut self, retry: RetryConfig) -> Self {
        self.flush_retry = retry;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    /// Capacity of each worker's channel.
    pub fn per_worker_capacity(&self) -> usize {
        (self.queue_capacity / self.workers.max(1)).max(1)
    }

    pub fn validate(&self) -> IngestResult<()> {
        let invalid = |msg: &str| Err(IngestError::Config(msg.to_string()));

        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        if self.max_batch_size == 0 {
            return invalid("max_batch_size must be at least 1");
        }
        if self.max_batch_timeout.is_zero() {
            return invalid("max_batch_timeout must be positive");
        }
        if !(self.dedup.threshold > 0.0 && self.dedup.threshold <= 1.0) {
            return invalid("similarity threshold must be in (0, 1]");
        }
        if self.dedup.min_examples == 0 {
            return invalid("min_examples must be at least 1");
        }
        if self.dedup.max_entries == 0 {
            return invalid("dedup window size must be at least 1");
        }
        if self.dedup.max_streams == 0 {
            return invalid("dedup stream cap must be at least 1");
        }
        Ok(())
    }
}
