//! Cache error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`CacheStore`](crate::CacheStore) backend.
#[derive(Debug, Clone, Error)]
pub enum CacheStoreError {
    /// Store could not be reached or refused the operation
    #[error("Cache store unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its timeout
    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),

    /// Store address or options could not be parsed
    #[error("Invalid cache store config: {0}")]
    InvalidConfig(String),

    /// Store was closed
    #[error("Cache store closed")]
    Closed,
}

/// Errors raised by the embedding cache.
///
/// Reads never return these; a failed read is a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] CacheStoreError),

    /// Entry could not be serialized or compressed
    #[error("Cache encode error: {0}")]
    Encode(String),

    /// Stored bytes are not a valid entry
    #[error("Cache decode error: {0}")]
    Decode(String),
}
