use async_trait::async_trait;

use crate::error::IngestResult;

/// Trait for embedding generation backends
///
/// One call is one attempt; timeouts and retries belong to [`super::EmbeddingClient`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> IngestResult<Vec<f32>>;

    /// Cheap reachability probe
    async fn health_check(&self) -> IngestResult<()>;
}
