//! Service error types.

use std::time::Duration;

use recall_embeddings::EmbeddingError;
use recall_types::RecallError;
use recall_vector::VectorError;
use thiserror::Error;

/// Errors returned by retrieval and the [`Recall`](crate::Recall) facade.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Vector(#[from] VectorError),

    /// Request did not finish within the configured deadline
    #[error("Request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    /// Pipeline could not be assembled from settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<RecallError> for RetrievalError {
    fn from(err: RecallError) -> Self {
        match err {
            RecallError::Config(msg) => RetrievalError::Config(msg),
            other => RetrievalError::Embedding(other.into()),
        }
    }
}

impl RetrievalError {
    /// Whether retrying the whole request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RetrievalError::Embedding(e) => e.is_transient(),
            RetrievalError::Vector(e) => e.is_transient(),
            RetrievalError::DeadlineExceeded(_) => true,
            RetrievalError::Config(_) => false,
        }
    }
}
