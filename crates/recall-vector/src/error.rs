//! Vector store error types.

use thiserror::Error;

use crate::types::CollectionConfig;

/// Errors that can occur during vector operations.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Index could not be reached, timed out, or failed server-side
    #[error("Vector index unavailable: {0}")]
    Unavailable(String),

    /// Index refused the request
    #[error("Vector index rejected request: {0}")]
    Rejected(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection exists with a different size or metric
    #[error("Collection {name} exists with {actual}, requested {requested}")]
    CollectionConfigMismatch {
        name: String,
        requested: CollectionConfig,
        actual: CollectionConfig,
    },

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// An upsert chunk failed; earlier chunks stay written
    #[error("Upsert chunk {chunk_index} failed after {chunks_written} chunk(s) written: {source}")]
    ChunkFailed {
        chunk_index: usize,
        chunks_written: usize,
        #[source]
        source: Box<VectorError>,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl VectorError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            VectorError::Unavailable(_) => true,
            VectorError::ChunkFailed { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}
