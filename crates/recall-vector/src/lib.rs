//! # recall-vector
//!
//! Vector index access for the vector-recall pipeline.
//!
//! ## Components
//! - [`VectorStore`]: collection lifecycle, chunked upserts, guarded search
//! - [`VectorBackend`]: seam implemented by [`QdrantBackend`] (REST) and
//!   [`InMemoryVectorBackend`] (brute force)
//! - [`Filter`]: payload conditions, pushed down when the backend can
//!   evaluate them and applied locally otherwise
//!
//! Scores are similarity-oriented for every metric: higher is closer.

pub mod backend;
pub mod error;
pub mod filter;
pub mod memory;
pub mod qdrant;
pub mod similarity;
pub mod store;
pub mod types;

pub use backend::{SearchRequest, VectorBackend};
pub use error::VectorError;
pub use filter::{match_value, Condition, Filter};
pub use memory::InMemoryVectorBackend;
pub use qdrant::{QdrantBackend, QdrantConfig};
pub use store::{VectorStore, VectorStoreConfig};
pub use types::{
    CollectionConfig, CollectionStats, DistanceMetric, Payload, SearchResult, VectorPoint,
};
