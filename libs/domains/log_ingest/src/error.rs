//! Ingest error types and error categorization
//!
//! Errors are categorized to determine retry behavior:
//! - **Transient**: backend hiccup, retry with exponential backoff
//! - **Permanent**: bad input or misconfiguration, never retried

use thiserror::Error;

/// Category of error for determining retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum IngestError {
    /// Line is not valid JSON (or not a JSON object)
    #[error("line {line}: invalid JSON: {message}")]
    Parse { line: usize, message: String },

    /// Line is JSON but a required field is missing or malformed
    #[error("line {line}: {message}")]
    Validation { line: usize, message: String },

    /// A single embedding attempt failed in a way worth retrying
    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// The provider refused the input; retrying will not help
    #[error("Embedding request rejected: {0}")]
    EmbeddingRejected(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    /// Provider still failing after the retry budget was spent
    #[error("Embedding provider unavailable after {attempts} attempts: {message}")]
    EmbeddingUnavailable { attempts: u32, message: String },

    #[error("Storage write failed: {0}")]
    StorageWrite(String),

    #[error("Storage unreachable: {0}")]
    StorageUnreachable(String),

    #[error(
        "Collection '{collection}' has vector dimension {actual}, configured dimension is {expected}"
    )]
    CollectionSchemaMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Inbound queue is full")]
    QueueFull,

    #[error("Pipeline is shutting down")]
    ShuttingDown,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

impl IngestError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        IngestError::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn validation(line: usize, message: impl Into<String>) -> Self {
        IngestError::Validation {
            line,
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            IngestError::EmbeddingProvider(_)
            | IngestError::StorageWrite(_)
            | IngestError::StorageUnreachable(_)
            | IngestError::QueueFull => ErrorCategory::Transient,
            IngestError::Parse { .. }
            | IngestError::Validation { .. }
            | IngestError::EmbeddingRejected(_)
            | IngestError::EmbeddingDimensionMismatch { .. }
            | IngestError::EmbeddingUnavailable { .. }
            | IngestError::CollectionSchemaMismatch { .. }
            | IngestError::ShuttingDown
            | IngestError::Config(_) => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Short machine-readable label used in responses and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Parse { .. } => "parse_error",
            IngestError::Validation { .. } => "validation_error",
            IngestError::EmbeddingProvider(_) => "embedding_provider",
            IngestError::EmbeddingRejected(_) => "embedding_rejected",
            IngestError::EmbeddingDimensionMismatch { .. } => "embedding_dimension",
            IngestError::EmbeddingUnavailable { .. } => "embedding_unavailable",
            IngestError::StorageWrite(_) => "storage_write",
            IngestError::StorageUnreachable(_) => "storage_unreachable",
            IngestError::CollectionSchemaMismatch { .. } => "collection_schema_mismatch",
            IngestError::QueueFull => "queue_full",
            IngestError::ShuttingDown => "shutting_down",
            IngestError::Config(_) => "config",
        }
    }

    /// Request line this error refers to, for per-record errors.
    pub fn line(&self) -> Option<usize> {
        match self {
            IngestError::Parse { line, .. } | IngestError::Validation { line, .. } => Some(*line),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            IngestError::EmbeddingRejected(format!("malformed response: {}", err))
        } else {
            IngestError::EmbeddingProvider(err.to_string())
        }
    }
}
