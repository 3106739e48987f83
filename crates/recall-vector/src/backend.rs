//! Vector index seam.

use async_trait::async_trait;

use crate::error::VectorError;
use crate::filter::Filter;
use crate::types::{CollectionConfig, CollectionStats, DistanceMetric, SearchResult, VectorPoint};

/// A search as sent to a backend.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: usize,
    /// Minimum similarity-oriented score
    pub score_threshold: Option<f32>,
    /// Only set when the backend reported it can evaluate the filter
    pub filter: Option<Filter>,
    /// Metric of the target collection, for score orientation
    pub metric: DistanceMetric,
}

/// Trait for vector index backends.
///
/// Backends perform one remote operation per call; dimension checks,
/// chunking, and filter fallback live in [`VectorStore`](crate::VectorStore).
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Stats for a collection, or None if it does not exist.
    async fn collection_info(&self, name: &str) -> Result<Option<CollectionStats>, VectorError>;

    /// Create a collection. Returns false if it already existed.
    async fn create_collection(
        &self,
        name: &str,
        config: &CollectionConfig,
    ) -> Result<bool, VectorError>;

    /// Returns whether the collection existed.
    async fn delete_collection(&self, name: &str) -> Result<bool, VectorError>;

    /// Insert or replace points by id.
    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<(), VectorError>;

    /// Top `limit` hits by descending score.
    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchResult>, VectorError>;

    /// Whether `search` can evaluate this filter server-side.
    fn supports_filter(&self, filter: &Filter) -> bool;

    /// Release pooled resources. Default is a no-op.
    async fn close(&self) {}
}
