//! # recall-service
//!
//! Request-level composition of the vector-recall pipeline.
//!
//! - [`EmbeddingService`]: cache-aside embeddings with bounded background writes
//! - [`RetrievalCoordinator`]: embed query text, then search a collection
//! - [`Recall`]: facade applying the request deadline, built from settings
//!   or injected backends

pub mod api;
pub mod coordinator;
pub mod embedding;
pub mod error;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use api::{Recall, RecallParts};
pub use coordinator::{QueryRequest, RetrievalCoordinator};
pub use embedding::{EmbeddingOutcome, EmbeddingService};
pub use error::RetrievalError;
pub use writer::{CacheWriter, WriterStats};
