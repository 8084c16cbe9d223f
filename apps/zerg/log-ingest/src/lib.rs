//! Log Ingest Service
//!
//! HTTP service that embeds incoming log lines, drops near-duplicates and
//! stores the rest in Qdrant.
//!
//! ## Architecture
//!
//! ```text
//! Log shipper (Fluent Bit, Vector, curl)
//!   ↓ (NDJSON over HTTP)
//! axum router (domain_log_ingest::handlers)
//!   ↓ (bounded queues, partitioned by source)
//! IngestPipeline workers
//!   ↓                      ↓
//! Embedding API       QdrantStore
//! ```
//!
//! ## Modules
//!
//! - `config`: Environment configuration (IngestConfig)
//! - `server`: Startup, serving and graceful shutdown

pub mod config;
pub mod server;

// Re-export for convenience
pub use config::IngestConfig;
pub use server::run;
