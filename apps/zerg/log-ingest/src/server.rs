//! Server initialization and lifecycle management
//!
//! This module handles all server setup:
//! - Tracing and metrics initialization
//! - Qdrant connection and collection check
//! - Embedding client setup
//! - Worker pool startup
//! - HTTP serving with graceful shutdown

use std::sync::Arc;

use core_config::FromEnv;
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_log_ingest::metrics::init_metrics;
use domain_log_ingest::{
    EmbeddingClient, HttpEmbeddingProvider, IngestMetrics, IngestPipeline, IngestState,
    PipelineHandle, QdrantStore, VectorStore, router,
};
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::IngestConfig;

/// Run the ingest service
///
/// This is the main entry point for server initialization. It:
/// 1. Loads and validates configuration
/// 2. Sets up structured logging and the Prometheus recorder
/// 3. Connects to Qdrant and creates or verifies the collection
/// 4. Starts the worker pool
/// 5. Serves HTTP until SIGINT or SIGTERM, then drains the pipeline
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - Qdrant stays unreachable for the startup timeout
/// - The collection exists with a different vector dimension
/// - Server binding fails
pub async fn run() -> Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    let config = IngestConfig::from_env().wrap_err("Failed to load configuration")?;

    // Initialize tracing (env-aware: JSON for prod, pretty for dev)
    init_tracing(&config.environment);
    init_metrics().wrap_err("Failed to install Prometheus recorder")?;

    info!(
        url = %config.qdrant.url,
        collection = %config.qdrant.collection,
        "Connecting to Qdrant..."
    );
    let store = QdrantStore::connect(config.qdrant.clone(), config.startup_timeout)
        .await
        .wrap_err("Failed to connect to Qdrant")?;
    store
        .ensure_collection()
        .await
        .wrap_err("Failed to prepare Qdrant collection")?;
    let store: Arc<dyn VectorStore> = Arc::new(store);

    let provider = HttpEmbeddingProvider::new(config.embedding.clone())
        .wrap_err("Failed to create embedding provider")?;
    let embedder = EmbeddingClient::new(Arc::new(provider), config.embedding.dimension)
        .with_timeout(config.embedding.timeout)
        .with_retry(config.embedding_retry.clone());

    // Warn only; every record retries on its own
    match embedder.health_check().await {
        Ok(()) => info!(model = %config.embedding.model, "Embedding provider reachable"),
        Err(e) => warn!(
            model = %config.embedding.model,
            error = %e,
            "Embedding provider health check failed, continuing"
        ),
    }

    let metrics = Arc::new(IngestMetrics::new());
    let pipeline = IngestPipeline::start(
        config.pipeline.clone(),
        Arc::new(embedder),
        store.clone(),
        metrics.clone(),
    )
    .wrap_err("Failed to start ingest pipeline")?;

    let state = IngestState::new(pipeline.handle(), store.clone(), metrics, config.app);
    let app = router(state, config.max_body_bytes).layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {}", addr))?;
    info!(
        name = config.app.name,
        version = config.app.version,
        "Log ingest service listening on {}",
        addr
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(pipeline.handle()))
        .await
        .wrap_err("HTTP server failed");

    let report = pipeline.shutdown().await;
    if report.aborted_workers > 0 {
        error!(
            aborted_workers = report.aborted_workers,
            "Workers were aborted during shutdown"
        );
    }

    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close vector store");
    }

    info!("Log ingest service stopped");
    served
}

/// Wait for SIGINT or SIGTERM, then stop the pipeline from accepting records.
///
/// Closing before axum finishes draining connections makes in-flight requests
/// answer `shutting_down` instead of queueing more work.
async fn shutdown_signal(handle: PipelineHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }

    handle.close();
}
