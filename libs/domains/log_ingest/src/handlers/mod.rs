//! HTTP surface: ingestion, probes, metrics.

mod health;
mod ingest;

pub use health::{HealthResponse, health_handler, metrics_handler, ready_handler, stats_handler};
pub use ingest::{IngestResponse, RejectedLine, ingest_handler};

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use core_config::AppInfo;
use tower_http::limit::RequestBodyLimitLayer;

use crate::metrics::IngestMetrics;
use crate::pipeline::PipelineHandle;
use crate::storage::VectorStore;

/// Shared state for every handler.
#[derive(Clone)]
pub struct IngestState {
    pub pipeline: PipelineHandle,
    pub store: Arc<dyn VectorStore>,
    pub metrics: Arc<IngestMetrics>,
    pub app: AppInfo,
}

impl IngestState {
    pub fn new(
        pipeline: PipelineHandle,
        store: Arc<dyn VectorStore>,
        metrics: Arc<IngestMetrics>,
        app: AppInfo,
    ) -> Self {
        Self {
            pipeline,
            store,
            metrics,
            app,
        }
    }
}

/// Build the service router.
///
/// Request bodies above `max_body_bytes` are refused with 413 before any parsing.
pub fn router(state: IngestState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/ingest", post(ingest_handler))
        .route("/api/v1/logs", post(ingest_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}
