use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::EmbeddingProvider;
use crate::error::{IngestError, IngestResult};
use crate::retry::{RetryConfig, retry_if};

/// Wraps an [`EmbeddingProvider`] with a per-attempt timeout, retry of
/// transient failures and a dimension check.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
    retry: RetryConfig,
    dimension: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimension: usize) -> Self {
        Self {
            provider,
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            dimension,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn embed(&self, text: &str) -> IngestResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(IngestError::EmbeddingRejected(
                "text is empty".to_string(),
            ));
        }

        let mut attempts = 0u32;
        let result = retry_if(
            || {
                attempts += 1;
                self.attempt(text)
            },
            &self.retry,
            IngestError::is_transient,
        )
        .await;

        let vector = match result {
            Ok(vector) => vector,
            Err(e) if e.is_transient() => {
                warn!(
                    provider = self.provider.name(),
                    attempts,
                    error = %e,
                    "Embedding provider unavailable"
                );
                return Err(IngestError::EmbeddingUnavailable {
                    attempts,
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };

        if vector.len() != self.dimension {
            return Err(IngestError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }

    async fn attempt(&self, text: &str) -> IngestResult<Vec<f32>> {
        match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(provider = self.provider.name(), timeout = ?self.timeout, "Embedding attempt timed out");
                Err(IngestError::EmbeddingProvider(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub async fn health_check(&self) -> IngestResult<()> {
        match tokio::time::timeout(self.timeout, self.provider.health_check()).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::EmbeddingProvider(
                "health check timed out".to_string(),
            )),
        }
    }
}
