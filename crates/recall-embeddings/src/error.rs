//! Embedding error types.

use recall_types::RecallError;
use thiserror::Error;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Model is not in the registry
    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backend could not be reached or failed transiently (retried)
    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend refused the request or returned something unusable (not retried)
    #[error("Embedding backend rejected request: {0}")]
    BackendRejected(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Request was cancelled before it completed
    #[error("Embedding request cancelled")]
    Cancelled,

    /// Client could not be configured
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EmbeddingError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::BackendUnavailable(_))
    }

    /// Short label used for error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            EmbeddingError::UnknownModel(_) => "unknown_model",
            EmbeddingError::InvalidInput(_) => "invalid_input",
            EmbeddingError::BackendUnavailable(_) => "unavailable",
            EmbeddingError::BackendRejected(_) => "rejected",
            EmbeddingError::DimensionMismatch { .. } => "dimension_mismatch",
            EmbeddingError::Cancelled => "cancelled",
            EmbeddingError::Config(_) => "config",
        }
    }
}

impl From<RecallError> for EmbeddingError {
    fn from(err: RecallError) -> Self {
        match err {
            RecallError::UnknownModel(model) => EmbeddingError::UnknownModel(model),
            RecallError::InvalidInput(msg) => EmbeddingError::InvalidInput(msg),
            RecallError::Config(msg) => EmbeddingError::Config(msg),
        }
    }
}
