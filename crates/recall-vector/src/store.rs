//! Collection lifecycle, chunked upserts, and guarded search.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use recall_types::VectorSettings;

use crate::backend::{SearchRequest, VectorBackend};
use crate::error::VectorError;
use crate::filter::Filter;
use crate::types::{CollectionConfig, CollectionStats, DistanceMetric, SearchResult, VectorPoint};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    /// Chunk size when the caller passes 0
    pub upsert_batch_size: usize,
    /// Candidate multiplier when a filter has to be applied client-side
    pub filter_overfetch: usize,
    /// Timeout for each backend call
    pub request_timeout: Duration,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self::from(&VectorSettings::default())
    }
}

impl From<&VectorSettings> for VectorStoreConfig {
    fn from(settings: &VectorSettings) -> Self {
        Self {
            upsert_batch_size: settings.upsert_batch_size,
            filter_overfetch: settings.filter_overfetch,
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Vector store over a [`VectorBackend`].
///
/// Collection configs seen through `ensure_collection` or `describe` are
/// cached so searches can check the query dimension without a round trip.
/// A cached config is re-read when it disagrees with the vectors passed in,
/// and dropped when the backend reports the collection missing, so another
/// process deleting or recreating a collection is picked up.
pub struct VectorStore {
    backend: Arc<dyn VectorBackend>,
    configs: RwLock<HashMap<String, CollectionConfig>>,
    config: VectorStoreConfig,
}

impl VectorStore {
    pub fn new(backend: Arc<dyn VectorBackend>, config: VectorStoreConfig) -> Self {
        Self {
            backend,
            configs: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Create a collection unless an identical one exists.
    pub async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        metric: DistanceMetric,
    ) -> Result<(), VectorError> {
        if name.trim().is_empty() {
            return Err(VectorError::InvalidInput(
                "collection name must not be empty".to_string(),
            ));
        }
        if vector_size == 0 {
            return Err(VectorError::InvalidInput(
                "vector_size must be > 0".to_string(),
            ));
        }
        let requested = CollectionConfig::new(vector_size, metric);

        if let Some(stats) = self.timed(self.backend.collection_info(name)).await? {
            self.remember(name, stats.config);
            return check_config(name, requested, stats.config);
        }

        if self
            .timed(self.backend.create_collection(name, &requested))
            .await?
        {
            info!(collection = %name, config = %requested, "Created collection");
            self.remember(name, requested);
            return Ok(());
        }

        // Someone else created it between our check and create.
        debug!(collection = %name, "Collection appeared concurrently, re-checking");
        let stats = self
            .timed(self.backend.collection_info(name))
            .await?
            .ok_or_else(|| VectorError::CollectionNotFound(name.to_string()))?;
        self.remember(name, stats.config);
        check_config(name, requested, stats.config)
    }

    /// Upsert points in sequential chunks of `batch_size` (0 = configured default).
    ///
    /// Every point is validated before the first write. Chunks already
    /// written stay written when a later one fails.
    pub async fn upsert(
        &self,
        collection: &str,
        points: &[VectorPoint],
        batch_size: usize,
    ) -> Result<(), VectorError> {
        if points.is_empty() {
            return Ok(());
        }
        let config = self.config_for(collection, points[0].vector.len()).await?;

        for point in points {
            if point.id.is_empty() {
                return Err(VectorError::InvalidInput(
                    "point id must not be empty".to_string(),
                ));
            }
            if point.vector.len() != config.vector_size {
                return Err(VectorError::DimensionMismatch {
                    expected: config.vector_size,
                    actual: point.vector.len(),
                });
            }
        }

        let batch_size = if batch_size == 0 {
            self.config.upsert_batch_size.max(1)
        } else {
            batch_size
        };

        for (chunk_index, chunk) in points.chunks(batch_size).enumerate() {
            if let Err(e) = self.timed(self.backend.upsert(collection, chunk)).await {
                let e = self.observe(collection, e);
                warn!(
                    collection = %collection,
                    chunk_index,
                    error = %e,
                    "Upsert chunk failed"
                );
                return Err(VectorError::ChunkFailed {
                    chunk_index,
                    chunks_written: chunk_index,
                    source: Box::new(e),
                });
            }
        }

        info!(
            collection = %collection,
            points = points.len(),
            chunks = points.len().div_ceil(batch_size),
            "Upserted points"
        );
        Ok(())
    }

    /// Nearest points to `query`, best first, at most `limit`.
    ///
    /// When the backend cannot evaluate `filter`, candidates are over-fetched
    /// and filtered here, so fewer than `limit` results may come back.
    pub async fn search(
        &self,
        collection: &str,
        query: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
        filter: Option<&Filter>,
    ) -> Result<Vec<SearchResult>, VectorError> {
        let config = self.config_for(collection, query.len()).await?;
        if query.len() != config.vector_size {
            return Err(VectorError::DimensionMismatch {
                expected: config.vector_size,
                actual: query.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let filter = filter.filter(|f| !f.is_empty());
        let local_filter = filter.filter(|f| !self.backend.supports_filter(f));

        let request = SearchRequest {
            vector: query.to_vec(),
            limit: match local_filter {
                Some(_) => limit.saturating_mul(self.config.filter_overfetch.max(1)),
                None => limit,
            },
            score_threshold,
            filter: match local_filter {
                Some(_) => None,
                None => filter.cloned(),
            },
            metric: config.distance,
        };

        let mut results = self
            .timed(self.backend.search(collection, &request))
            .await
            .map_err(|e| self.observe(collection, e))?;

        if let Some(filter) = local_filter {
            let fetched = results.len();
            results.retain(|r| filter.matches(&r.payload));
            warn!(
                collection = %collection,
                backend = self.backend.name(),
                fetched,
                kept = results.len(),
                "Filter not supported by backend, applied client-side"
            );
        }
        if let Some(threshold) = score_threshold {
            results.retain(|r| r.score >= threshold);
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);

        debug!(collection = %collection, results = results.len(), "Search complete");
        Ok(results)
    }

    /// Point count and config of a collection.
    pub async fn describe(&self, collection: &str) -> Result<CollectionStats, VectorError> {
        let stats = self
            .timed(self.backend.collection_info(collection))
            .await?
            .ok_or_else(|| {
                self.forget(collection);
                VectorError::CollectionNotFound(collection.to_string())
            })?;
        self.remember(collection, stats.config);
        Ok(stats)
    }

    /// Drop a collection. Returns whether it existed.
    pub async fn delete_collection(&self, name: &str) -> Result<bool, VectorError> {
        let existed = self.timed(self.backend.delete_collection(name)).await?;
        self.forget(name);
        if existed {
            info!(collection = %name, "Deleted collection");
        }
        Ok(existed)
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }

    /// Config of `name`, re-read from the backend when the cached one does
    /// not match `dimension`.
    async fn config_for(&self, name: &str, dimension: usize) -> Result<CollectionConfig, VectorError> {
        if let Some(cached) = self.cached_config(name) {
            if cached.vector_size == dimension {
                return Ok(cached);
            }
            debug!(
                collection = %name,
                cached_size = cached.vector_size,
                dimension,
                "Cached collection config disagrees, re-reading"
            );
        }
        self.describe(name).await.map(|stats| stats.config)
    }

    /// Drop the cached config when the backend no longer has the collection.
    fn observe(&self, name: &str, err: VectorError) -> VectorError {
        if matches!(err, VectorError::CollectionNotFound(_)) {
            self.forget(name);
        }
        err
    }

    fn forget(&self, name: &str) {
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    fn cached_config(&self, name: &str) -> Option<CollectionConfig> {
        self.configs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }

    fn remember(&self, name: &str, config: CollectionConfig) {
        self.configs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), config);
    }

    async fn timed<T>(
        &self,
        op: impl Future<Output = Result<T, VectorError>>,
    ) -> Result<T, VectorError> {
        match tokio::time::timeout(self.config.request_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(VectorError::Unavailable(format!(
                "request timed out after {}ms",
                self.config.request_timeout.as_millis()
            ))),
        }
    }
}

fn check_config(
    name: &str,
    requested: CollectionConfig,
    actual: CollectionConfig,
) -> Result<(), VectorError> {
    if requested == actual {
        Ok(())
    } else {
        Err(VectorError::CollectionConfigMismatch {
            name: name.to_string(),
            requested,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{match_value, Condition};
    use crate::memory::InMemoryVectorBackend;
    use serde_json::json;

    fn store_with(backend: Arc<InMemoryVectorBackend>) -> VectorStore {
        VectorStore::new(backend, VectorStoreConfig::default())
    }

    fn point(id: &str, vector: Vec<f32>, payload: serde_json::Value) -> VectorPoint {
        VectorPoint::new(id, vector).with_payload(payload.as_object().cloned().unwrap_or_default())
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());

        store.ensure_collection("kb", 4, DistanceMetric::Cosine).await.unwrap();
        store.ensure_collection("kb", 4, DistanceMetric::Cosine).await.unwrap();

        let stats = store.describe("kb").await.unwrap();
        assert_eq!(stats.config, CollectionConfig::new(4, DistanceMetric::Cosine));
        assert_eq!(stats.point_count, 0);
    }

    #[tokio::test]
    async fn test_ensure_collection_mismatch() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        store_with(backend.clone())
            .ensure_collection("kb", 4, DistanceMetric::Cosine)
            .await
            .unwrap();

        // Fresh store: no cached config, must read it from the backend
        let err = store_with(backend)
            .ensure_collection("kb", 8, DistanceMetric::Cosine)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::CollectionConfigMismatch { ref name, .. } if name == "kb"
        ));
    }

    #[tokio::test]
    async fn test_ensure_collection_rejects_bad_input() {
        let store = store_with(Arc::new(InMemoryVectorBackend::new()));
        assert!(matches!(
            store.ensure_collection("", 4, DistanceMetric::Cosine).await,
            Err(VectorError::InvalidInput(_))
        ));
        assert!(matches!(
            store.ensure_collection("kb", 0, DistanceMetric::Cosine).await,
            Err(VectorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_upsert_validates_before_writing() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();

        let points = vec![
            VectorPoint::new("1", vec![1.0, 0.0]),
            VectorPoint::new("2", vec![1.0, 0.0, 0.0]),
        ];
        let err = store.upsert("kb", &points, 0).await.unwrap_err();

        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(backend.upsert_calls(), 0);
        assert_eq!(backend.point_count("kb"), 0);
    }

    #[tokio::test]
    async fn test_upsert_chunks_and_reports_failed_chunk() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();

        let points: Vec<VectorPoint> = (0..5)
            .map(|i| VectorPoint::new(i.to_string(), vec![1.0, i as f32]))
            .collect();

        backend.fail_upserts_after(1);
        let err = store.upsert("kb", &points, 2).await.unwrap_err();

        match err {
            VectorError::ChunkFailed {
                chunk_index,
                chunks_written,
                ref source,
            } => {
                assert_eq!(chunk_index, 1);
                assert_eq!(chunks_written, 1);
                assert!(matches!(**source, VectorError::Unavailable(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
        assert_eq!(backend.point_count("kb"), 2);
    }

    #[tokio::test]
    async fn test_upsert_missing_collection() {
        let store = store_with(Arc::new(InMemoryVectorBackend::new()));
        let err = store
            .upsert("nope", &[VectorPoint::new("1", vec![1.0])], 0)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_search_dimension_guard_skips_backend() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 3, DistanceMetric::Cosine).await.unwrap();

        let err = store
            .search("kb", &[1.0, 0.0], 5, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(backend.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_still_checks_dimension() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 3, DistanceMetric::Cosine).await.unwrap();

        let err = store
            .search("kb", &[1.0, 0.0], 0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VectorError::DimensionMismatch { .. }));

        let empty = store.search("kb", &[1.0, 0.0, 0.0], 0, None, None).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(backend.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_ensure_collection_recreates_after_external_delete() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let ours = store_with(backend.clone());
        let theirs = store_with(backend.clone());

        ours.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        assert!(theirs.delete_collection("kb").await.unwrap());

        ours.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        ours.upsert("kb", &[VectorPoint::new("1", vec![1.0, 0.0])], 0)
            .await
            .unwrap();
        assert_eq!(backend.point_count("kb"), 1);
    }

    #[tokio::test]
    async fn test_external_recreate_with_new_size_is_picked_up() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let ours = store_with(backend.clone());
        let theirs = store_with(backend.clone());

        ours.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        theirs.delete_collection("kb").await.unwrap();
        theirs.ensure_collection("kb", 3, DistanceMetric::Cosine).await.unwrap();

        ours.upsert("kb", &[VectorPoint::new("1", vec![1.0, 0.0, 0.0])], 0)
            .await
            .unwrap();
        let results = ours
            .search("kb", &[1.0, 0.0, 0.0], 5, None, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "1");

        // The old size is now rejected against the fresh config
        let err = ours.search("kb", &[1.0, 0.0], 5, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            VectorError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_collection_drops_cached_config() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let ours = store_with(backend.clone());
        let theirs = store_with(backend.clone());

        ours.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        theirs.delete_collection("kb").await.unwrap();

        let err = ours.search("kb", &[1.0, 0.0], 5, None, None).await.unwrap_err();
        assert!(matches!(err, VectorError::CollectionNotFound(_)));
        assert!(ours.cached_config("kb").is_none());
    }

    #[tokio::test]
    async fn test_search_orders_and_limits() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend);
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        store
            .upsert(
                "kb",
                &[
                    VectorPoint::new("far", vec![0.0, 1.0]),
                    VectorPoint::new("near", vec![1.0, 0.1]),
                    VectorPoint::new("mid", vec![1.0, 1.0]),
                ],
                0,
            )
            .await
            .unwrap();

        let hits = store.search("kb", &[1.0, 0.0], 2, None, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);

        let thresholded = store
            .search("kb", &[1.0, 0.0], 10, Some(0.5), None)
            .await
            .unwrap();
        assert_eq!(thresholded.len(), 2);
    }

    #[tokio::test]
    async fn test_euclidean_ordering() {
        let store = store_with(Arc::new(InMemoryVectorBackend::new()));
        store
            .ensure_collection("geo", 2, DistanceMetric::Euclidean)
            .await
            .unwrap();
        store
            .upsert(
                "geo",
                &[
                    VectorPoint::new("a", vec![10.0, 10.0]),
                    VectorPoint::new("b", vec![1.0, 1.0]),
                ],
                0,
            )
            .await
            .unwrap();

        let hits = store.search("geo", &[0.0, 0.0], 2, None, None).await.unwrap();
        assert_eq!(hits[0].id, "b");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_supported_filter_is_pushed_down() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        store
            .upsert(
                "kb",
                &[
                    point("1", vec![1.0, 0.0], json!({"lang": "rust"})),
                    point("2", vec![1.0, 0.0], json!({"lang": "go"})),
                ],
                0,
            )
            .await
            .unwrap();

        let filter = Filter::new().must(match_value("lang", "rust"));
        let hits = store
            .search("kb", &[1.0, 0.0], 5, None, Some(&filter))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        let sent = backend.last_search().unwrap();
        assert_eq!(sent.filter, Some(filter));
        assert_eq!(sent.limit, 5);
    }

    #[tokio::test]
    async fn test_unsupported_filter_falls_back_client_side() {
        let backend = Arc::new(InMemoryVectorBackend::new().without_text_filters());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();
        store
            .upsert(
                "kb",
                &[
                    point("1", vec![1.0, 0.0], json!({"body": "rust vectors"})),
                    point("2", vec![1.0, 0.1], json!({"body": "go channels"})),
                    point("3", vec![0.9, 0.2], json!({"body": "rust traits"})),
                ],
                0,
            )
            .await
            .unwrap();

        let filter = Filter::new().must(Condition::TextContains {
            key: "body".into(),
            text: "rust".into(),
        });
        let hits = store
            .search("kb", &[1.0, 0.0], 2, None, Some(&filter))
            .await
            .unwrap();

        let sent = backend.last_search().unwrap();
        assert!(sent.filter.is_none());
        assert_eq!(sent.limit, 2 * VectorStoreConfig::default().filter_overfetch);

        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_describe_missing_collection() {
        let store = store_with(Arc::new(InMemoryVectorBackend::new()));
        assert!(matches!(
            store.describe("nope").await,
            Err(VectorError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_collection_clears_cached_config() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend);
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();

        assert!(store.delete_collection("kb").await.unwrap());
        assert!(!store.delete_collection("kb").await.unwrap());

        store.ensure_collection("kb", 4, DistanceMetric::Dot).await.unwrap();
        assert_eq!(
            store.describe("kb").await.unwrap().config,
            CollectionConfig::new(4, DistanceMetric::Dot)
        );
    }

    #[tokio::test]
    async fn test_backend_outage_surfaces_unavailable() {
        let backend = Arc::new(InMemoryVectorBackend::new());
        let store = store_with(backend.clone());
        store.ensure_collection("kb", 2, DistanceMetric::Cosine).await.unwrap();

        backend.set_available(false);
        let err = store
            .search("kb", &[1.0, 0.0], 1, None, None)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
