//! Embedding result types.

use std::time::Duration;

/// A vector produced by the model backend, with call metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEmbedding {
    /// The embedding vector (length == model dimensions)
    pub vector: Vec<f32>,
    /// Model that produced it
    pub model: String,
    /// Input was cut to the model's max_input_length before the call
    pub truncated: bool,
    /// Wall time including retries
    pub latency: Duration,
    /// Backend calls made (1 when the first call succeeded)
    pub attempts: u32,
}

impl GeneratedEmbedding {
    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}
