//! # recall-embeddings
//!
//! Embedding generation for the vector-recall pipeline.
//!
//! ## Features
//! - Model contract enforcement via the shared registry
//! - Character-based truncation to the model's input limit
//! - Exponential backoff on transient backend failures
//! - Order-preserving batches with bounded fan-out and cancellation
//!
//! ## Usage
//! ```rust,ignore
//! use recall_embeddings::{ClientConfig, EmbeddingClient, OllamaBackend, OllamaConfig};
//!
//! let backend = OllamaBackend::new(OllamaConfig::default())?;
//! let client = EmbeddingClient::new(Arc::new(backend), registry, ClientConfig::default());
//! let embedding = client.generate("hello", "nomic-embed-text", &options).await?;
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod model;

pub use backend::{EmbeddingBackend, OllamaBackend, OllamaConfig};
pub use client::{ClientConfig, EmbeddingClient, RetryPolicy};
pub use error::EmbeddingError;
pub use model::GeneratedEmbedding;
