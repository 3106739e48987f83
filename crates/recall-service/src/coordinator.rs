//! Query-time retrieval: embed the query text, then search.

use std::sync::Arc;

use tracing::debug;

use recall_types::{EmbeddingOptions, DEFAULT_MODEL};
use recall_vector::{Filter, SearchResult, VectorStore};

use crate::embedding::EmbeddingService;
use crate::error::RetrievalError;

/// A retrieval query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub model: String,
    pub collection: String,
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub filter: Option<Filter>,
    pub options: EmbeddingOptions,
}

impl QueryRequest {
    /// Query with the default model and a limit of 10.
    pub fn new(text: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: DEFAULT_MODEL.to_string(),
            collection: collection.into(),
            limit: 10,
            score_threshold: None,
            filter: None,
            options: EmbeddingOptions::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_options(mut self, options: EmbeddingOptions) -> Self {
        self.options = options;
        self
    }
}

/// Stateless composition of the embedding service and the vector store.
pub struct RetrievalCoordinator {
    embeddings: Arc<EmbeddingService>,
    vectors: Arc<VectorStore>,
}

impl RetrievalCoordinator {
    pub fn new(embeddings: Arc<EmbeddingService>, vectors: Arc<VectorStore>) -> Self {
        Self {
            embeddings,
            vectors,
        }
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<SearchResult>, RetrievalError> {
        let embedding = self
            .embeddings
            .get_or_create(&request.text, &request.model, &request.options)
            .await?;

        let results = self
            .vectors
            .search(
                &request.collection,
                &embedding.vector,
                request.limit,
                request.score_threshold,
                request.filter.as_ref(),
            )
            .await?;

        debug!(
            collection = %request.collection,
            model = %request.model,
            cache_hit = embedding.cache_hit,
            results = results.len(),
            "Query complete"
        );
        Ok(results)
    }
}
