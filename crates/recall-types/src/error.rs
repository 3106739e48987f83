//! Error types shared across vector-recall crates.

use thiserror::Error;

/// Unified error type for configuration and registry lookups.
#[derive(Debug, Error)]
pub enum RecallError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model name not present in the registry
    #[error("Unknown embedding model: {0}")]
    UnknownModel(String),
}
