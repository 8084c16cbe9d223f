//! Liveness, readiness and monitoring handlers.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`)
//! - Prometheus metrics (`/metrics`)
//! - Counter snapshot (`/stats`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

use super::IngestState;
use crate::metrics::{self, MetricsSnapshot};

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<IngestState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app.name.to_string(),
        version: state.app.version.to_string(),
    })
}

/// Readiness probe handler.
///
/// Ready while the vector store answers and the pipeline still accepts records.
pub async fn ready_handler(
    State(state): State<IngestState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let store = state.store.health_check().await;
    let accepting = state.pipeline.is_accepting();

    let store_status = match &store {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            error!(error = %e, "Readiness check failed: vector store");
            format!("error: {}", e)
        }
    };

    let body = json!({
        "status": if store.is_ok() && accepting { "ready" } else { "not_ready" },
        "checks": {
            "vector_store": store_status,
            "pipeline": if accepting { "accepting" } else { "closed" },
        }
    });

    if store.is_ok() && accepting {
        Ok((StatusCode::OK, Json(body)))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)))
    }
}

/// Prometheus metrics endpoint handler.
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// Exact counter values from the in-process registry.
pub async fn stats_handler(State(state): State<IngestState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
