//! Log Ingest Domain Library
//!
//! Accepts newline-delimited JSON log records over HTTP, embeds each message,
//! suppresses near-duplicates per source stream and writes the survivors to
//! Qdrant in batches.
//!
//! # Architecture
//!
//! ```text
//! POST /ingest ─► parser ─► PipelineHandle (bounded, partitioned by source)
//!                                │
//!               ┌────────────────┼────────────────┐
//!               ▼                ▼                ▼
//!           Worker 0         Worker 1   ...   Worker N-1
//!               │  EmbeddingClient (retry + timeout)
//!               │  SimilarityDeduplicator (per-stream window)
//!               │  BatchAccumulator (size or age flush)
//!               ▼
//!          VectorStore (trait) ─► QdrantStore
//! ```
//!
//! # Features
//!
//! - **Two record shapes**: direct `{timestamp, message, source}` objects and
//!   log-shipper output with Kubernetes fields
//! - **Backpressure**: a full partition queue refuses records instead of buffering
//! - **Ordering**: records from one source keep their arrival order end to end
//! - **Graceful shutdown**: queued records are drained until a hard deadline
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use core_config::{FromEnv, app_info};
//! use domain_log_ingest::{
//!     EmbeddingClient, HttpEmbeddingConfig, HttpEmbeddingProvider, IngestMetrics,
//!     IngestPipeline, IngestState, PipelineConfig, QdrantConfig, QdrantStore, VectorStore,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn VectorStore> = Arc::new(QdrantStore::new(QdrantConfig::from_env()?)?);
//! store.ensure_collection().await?;
//!
//! let embedding = HttpEmbeddingConfig::from_env()?;
//! let dimension = embedding.dimension;
//! let embedder = EmbeddingClient::new(Arc::new(HttpEmbeddingProvider::new(embedding)?), dimension);
//!
//! let metrics = Arc::new(IngestMetrics::new());
//! let pipeline = IngestPipeline::start(
//!     PipelineConfig::default(),
//!     Arc::new(embedder),
//!     store.clone(),
//!     metrics.clone(),
//! )?;
//!
//! let state = IngestState::new(pipeline.handle(), store, metrics, app_info!());
//! let app = domain_log_ingest::router(state, 10 * 1024 * 1024);
//! # let _ = app;
//! let report = pipeline.shutdown().await;
//! println!("stored {} records", report.counters.records_stored);
//! # Ok(())
//! # }
//! ```

pub mod dedup;
pub mod embedding;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod storage;

// Re-export commonly used types
pub use dedup::{DedupConfig, Decision, SimilarityDeduplicator};
pub use embedding::{EmbeddingClient, EmbeddingProvider, HttpEmbeddingConfig, HttpEmbeddingProvider};
pub use error::{ErrorCategory, IngestError, IngestResult};
pub use handlers::{IngestResponse, IngestState, RejectedLine, router};
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use models::{Batch, EmbeddedRecord, LogRecord};
pub use pipeline::{IngestPipeline, PipelineConfig, PipelineHandle, ShutdownReport};
pub use retry::RetryConfig;
pub use storage::VectorStore;
pub use storage::qdrant::{QdrantConfig, QdrantStore};
