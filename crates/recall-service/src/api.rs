//! Public facade over the retrieval pipeline.
//!
//! [`Recall::connect`] builds every backend from [`Settings`];
//! [`Recall::from_parts`] accepts injected backends. Nothing is global, and
//! [`Recall::close`] releases what `connect` opened.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use recall_cache::{
    CacheConfig, CacheStats, CacheStore, EmbeddingCache, InMemoryStore, RedisStore,
};
use recall_embeddings::{
    ClientConfig, EmbeddingBackend, EmbeddingClient, EmbeddingError, OllamaBackend, OllamaConfig,
};
use recall_types::{EmbeddingOptions, MetricsSink, NoopMetrics, Settings, VectorBackendKind};
use recall_vector::{
    CollectionStats, DistanceMetric, InMemoryVectorBackend, QdrantBackend, QdrantConfig,
    SearchResult, VectorBackend, VectorPoint, VectorStore, VectorStoreConfig,
};

use crate::coordinator::{QueryRequest, RetrievalCoordinator};
use crate::embedding::{EmbeddingOutcome, EmbeddingService};
use crate::error::RetrievalError;

/// Backends to assemble a [`Recall`] from.
pub struct RecallParts {
    pub embedding_backend: Arc<dyn EmbeddingBackend>,
    /// None disables caching
    pub cache_store: Option<Arc<dyn CacheStore>>,
    pub vector_backend: Arc<dyn VectorBackend>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Embedding generation, caching, and vector retrieval behind one handle.
pub struct Recall {
    embeddings: Arc<EmbeddingService>,
    vectors: Arc<VectorStore>,
    coordinator: RetrievalCoordinator,
    request_deadline: Duration,
    default_model: String,
}

impl Recall {
    /// Build the pipeline from settings.
    ///
    /// The cache runs on Redis when `settings.cache.url` is set and in
    /// process otherwise; the vector backend follows `settings.vector.backend`.
    pub async fn connect(settings: &Settings) -> Result<Self, RetrievalError> {
        settings.validate()?;

        let embedding_backend = OllamaBackend::new(OllamaConfig {
            base_url: settings.embedding.base_url.clone(),
            timeout: settings.embedding.request_timeout(),
            pool_max_idle: settings.embedding.pool_max_idle,
        })?;

        let vector_backend: Arc<dyn VectorBackend> = match settings.vector.backend {
            VectorBackendKind::Qdrant => {
                let mut config = QdrantConfig {
                    url: settings.vector.url.clone(),
                    timeout: settings.vector.request_timeout(),
                    pool_max_idle: settings.vector.pool_max_idle,
                    ..QdrantConfig::default()
                };
                if let Some(key) = &settings.vector.api_key {
                    config = config.with_api_key(key.clone());
                }
                Arc::new(QdrantBackend::new(config)?)
            }
            VectorBackendKind::Memory => Arc::new(InMemoryVectorBackend::new()),
        };

        let cache_store: Option<Arc<dyn CacheStore>> = match &settings.cache.url {
            _ if !settings.cache.enabled => None,
            Some(url) => Some(Arc::new(
                RedisStore::new(url).map_err(|e| RetrievalError::Config(e.to_string()))?,
            )),
            None => Some(Arc::new(InMemoryStore::new())),
        };

        let recall = Self::from_parts(
            settings,
            RecallParts {
                embedding_backend: Arc::new(embedding_backend),
                cache_store,
                vector_backend,
                metrics: Arc::new(NoopMetrics),
            },
        )?;

        if let Some(cache) = recall.embeddings.cache() {
            if let Err(e) = cache.ping().await {
                warn!(error = %e, "Cache store not reachable, continuing without hits");
            }
        }

        info!(
            embedding_url = %settings.embedding.base_url,
            vector_backend = recall.vectors.backend_name(),
            cache = recall.embeddings.cache().map_or("off", |c| c.store_name()),
            "Retrieval pipeline connected"
        );
        Ok(recall)
    }

    /// Assemble the pipeline from injected backends.
    pub fn from_parts(settings: &Settings, parts: RecallParts) -> Result<Self, RetrievalError> {
        settings.validate()?;

        let client = Arc::new(
            EmbeddingClient::new(
                parts.embedding_backend,
                Arc::new(settings.model_registry()),
                ClientConfig::from(&settings.embedding),
            )
            .with_metrics(Arc::clone(&parts.metrics)),
        );

        let service = match parts.cache_store {
            Some(store) => {
                let cache = Arc::new(EmbeddingCache::new(store, CacheConfig::from(&settings.cache)));
                EmbeddingService::with_cache(client, cache, settings.cache.max_background_writes)
            }
            None => EmbeddingService::uncached(client),
        };
        let embeddings = Arc::new(service.with_metrics(parts.metrics));

        let vectors = Arc::new(VectorStore::new(
            parts.vector_backend,
            VectorStoreConfig::from(&settings.vector),
        ));

        Ok(Self {
            coordinator: RetrievalCoordinator::new(Arc::clone(&embeddings), Arc::clone(&vectors)),
            embeddings,
            vectors,
            request_deadline: settings.request_deadline(),
            default_model: settings.embedding.default_model.clone(),
        })
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub fn vectors(&self) -> &VectorStore {
        &self.vectors
    }

    /// Embed one text, from cache when possible.
    pub async fn generate_embedding(
        &self,
        text: &str,
        model: &str,
        options: &EmbeddingOptions,
    ) -> Result<EmbeddingOutcome, RetrievalError> {
        self.within_deadline(self.embeddings.get_or_create(text, model, options))
            .await?
            .map_err(Into::into)
    }

    /// Embed many texts; element `i` belongs to `texts[i]`.
    ///
    /// When the request deadline passes, items not yet finished report
    /// [`EmbeddingError::Cancelled`] and finished ones are kept.
    pub async fn generate_embeddings_batch<T>(
        &self,
        texts: &[T],
        model: &str,
        options: &EmbeddingOptions,
    ) -> Vec<Result<EmbeddingOutcome, EmbeddingError>>
    where
        T: AsRef<str> + Sync,
    {
        let cancel = CancellationToken::new();
        let batch = self
            .embeddings
            .batch_get_or_create_until(texts, model, options, &cancel);
        tokio::pin!(batch);

        tokio::select! {
            results = &mut batch => results,
            _ = tokio::time::sleep(self.request_deadline) => {
                warn!(count = texts.len(), "Batch deadline exceeded, cancelling remaining items");
                cancel.cancel();
                batch.await
            }
        }
    }

    /// Embed the query text and search the collection.
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<SearchResult>, RetrievalError> {
        self.within_deadline(self.coordinator.query(request)).await?
    }

    pub async fn ensure_collection(
        &self,
        name: &str,
        vector_size: usize,
        metric: DistanceMetric,
    ) -> Result<(), RetrievalError> {
        Ok(self
            .vectors
            .ensure_collection(name, vector_size, metric)
            .await?)
    }

    /// Upsert points in chunks of `batch_size` (0 = configured default).
    pub async fn upsert_vectors(
        &self,
        collection: &str,
        points: &[VectorPoint],
        batch_size: usize,
    ) -> Result<(), RetrievalError> {
        Ok(self.vectors.upsert(collection, points, batch_size).await?)
    }

    pub async fn describe_collection(&self, name: &str) -> Result<CollectionStats, RetrievalError> {
        Ok(self.vectors.describe(name).await?)
    }

    /// Cache statistics, or None when caching is disabled.
    pub async fn cache_stats(&self) -> Option<CacheStats> {
        match self.embeddings.cache() {
            Some(cache) => Some(cache.stats().await),
            None => None,
        }
    }

    /// Flush pending cache writes and release every backend.
    pub async fn close(&self) {
        self.embeddings.flush().await;
        if let Some(cache) = self.embeddings.cache() {
            cache.close().await;
        }
        self.embeddings.client().close().await;
        self.vectors.close().await;
        info!("Retrieval pipeline closed");
    }

    async fn within_deadline<T>(
        &self,
        op: impl std::future::Future<Output = T>,
    ) -> Result<T, RetrievalError> {
        tokio::time::timeout(self.request_deadline, op)
            .await
            .map_err(|_| RetrievalError::DeadlineExceeded(self.request_deadline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingBackend;
    use recall_types::InMemoryMetrics;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.models.push(recall_types::ModelDescriptor::new(
            "tiny",
            4,
            10,
            recall_types::PerformanceTier::Fast,
        ));
        settings
    }

    fn offline_settings() -> Settings {
        let mut settings = settings();
        settings.vector.backend = VectorBackendKind::Memory;
        settings.cache.op_timeout_ms = 200;
        settings
    }

    #[tokio::test]
    async fn test_connect_picks_cache_store_from_url() {
        let recall = Recall::connect(&offline_settings()).await.unwrap();
        assert_eq!(recall.embeddings().cache().unwrap().store_name(), "memory");

        // Unreachable server: connect still succeeds and lookups miss
        let mut settings = offline_settings();
        settings.cache.url = Some("redis://127.0.0.1:1/".to_string());
        let recall = Recall::connect(&settings).await.unwrap();
        let cache = recall.embeddings().cache().unwrap();
        assert_eq!(cache.store_name(), "redis");
        assert!(cache
            .get("x", "tiny", &EmbeddingOptions::default())
            .await
            .is_none());

        let mut settings = offline_settings();
        settings.cache.enabled = false;
        settings.cache.url = Some("redis://127.0.0.1:1/".to_string());
        let recall = Recall::connect(&settings).await.unwrap();
        assert!(recall.embeddings().cache().is_none());
    }

    #[tokio::test]
    async fn test_connect_rejects_non_redis_cache_url() {
        let mut settings = offline_settings();
        settings.cache.url = Some("memcached://localhost:11211".to_string());
        assert!(matches!(
            Recall::connect(&settings).await,
            Err(RetrievalError::Config(_))
        ));
    }

    fn recall(backend: Arc<CountingBackend>, metrics: Arc<InMemoryMetrics>) -> Recall {
        Recall::from_parts(
            &settings(),
            RecallParts {
                embedding_backend: backend,
                cache_store: Some(Arc::new(InMemoryStore::new())),
                vector_backend: Arc::new(InMemoryVectorBackend::new()),
                metrics,
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_from_parts_round_trip() {
        let backend = Arc::new(CountingBackend::new(4));
        let metrics = Arc::new(InMemoryMetrics::new());
        let recall = recall(backend.clone(), metrics.clone());
        let options = EmbeddingOptions::default();

        recall.ensure_collection("kb", 4, DistanceMetric::Cosine).await.unwrap();
        recall
            .upsert_vectors("kb", &[VectorPoint::new("1", vec![1.0; 4])], 0)
            .await
            .unwrap();

        let results = recall
            .query(&QueryRequest::new("find", "kb").with_model("tiny"))
            .await
            .unwrap();
        assert_eq!(results[0].id, "1");

        recall.embeddings().flush().await;
        let outcome = recall.generate_embedding("find", "tiny", &options).await.unwrap();
        assert!(outcome.cache_hit);
        assert_eq!(backend.calls(), 1);

        let stats = recall.cache_stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.total_keys, 1);
        assert_eq!(
            metrics.duration_count("embedding_request_duration_seconds", &[("model", "tiny")]),
            1
        );

        recall.close().await;
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let mut bad = settings();
        bad.request_deadline_secs = 0;
        let result = Recall::from_parts(
            &bad,
            RecallParts {
                embedding_backend: Arc::new(CountingBackend::new(4)),
                cache_store: None,
                vector_backend: Arc::new(InMemoryVectorBackend::new()),
                metrics: Arc::new(NoopMetrics),
            },
        );
        assert!(matches!(result, Err(RetrievalError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_with_memory_vector_backend() {
        let mut settings = settings();
        settings.vector.backend = VectorBackendKind::Memory;

        let recall = Recall::connect(&settings).await.unwrap();
        assert_eq!(recall.default_model(), "nomic-embed-text");
        assert_eq!(recall.vectors().backend_name(), "memory");
        recall.close().await;
    }

    #[tokio::test]
    async fn test_cache_disabled_has_no_stats() {
        let recall = Recall::from_parts(
            &settings(),
            RecallParts {
                embedding_backend: Arc::new(CountingBackend::new(4)),
                cache_store: None,
                vector_backend: Arc::new(InMemoryVectorBackend::new()),
                metrics: Arc::new(NoopMetrics),
            },
        )
        .unwrap();
        assert!(recall.cache_stats().await.is_none());
    }
}
