use async_trait::async_trait;

use crate::error::IngestResult;
use crate::models::Batch;

/// Destination for embedded batches
///
/// Implementations must be safe to call from every worker concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; fail if it exists with another dimension.
    async fn ensure_collection(&self) -> IngestResult<()>;

    /// Write a whole batch, all or nothing.
    async fn insert_batch(&self, batch: &Batch) -> IngestResult<()>;

    async fn health_check(&self) -> IngestResult<()>;

    /// Release the connection; later inserts fail.
    async fn close(&self) -> IngestResult<()>;
}
