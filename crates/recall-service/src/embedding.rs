//! Cache-aside embedding service.
//!
//! Lookups go to the cache first; misses are generated by the client and
//! handed to the [`CacheWriter`] without waiting. Concurrent misses for the
//! same text are not coalesced and may each reach the backend.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use recall_cache::{CacheItem, EmbeddingCache};
use recall_embeddings::{EmbeddingClient, EmbeddingError};
use recall_types::{EmbeddingOptions, MetricsSink, NoopMetrics};

use crate::writer::CacheWriter;

/// An embedding and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingOutcome {
    pub vector: Vec<f32>,
    pub cache_hit: bool,
    /// The text exceeded the model's input limit and was cut before embedding
    pub truncated: bool,
}

/// Embedding client fronted by an optional cache.
pub struct EmbeddingService {
    client: Arc<EmbeddingClient>,
    cache: Option<Arc<EmbeddingCache>>,
    writer: Option<CacheWriter>,
    metrics: Arc<dyn MetricsSink>,
}

impl EmbeddingService {
    /// Service without a cache; every call reaches the backend.
    pub fn uncached(client: Arc<EmbeddingClient>) -> Self {
        Self {
            client,
            cache: None,
            writer: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Service with a cache and at most `max_background_writes` writes in flight.
    pub fn with_cache(
        client: Arc<EmbeddingClient>,
        cache: Arc<EmbeddingCache>,
        max_background_writes: usize,
    ) -> Self {
        Self {
            client,
            writer: Some(CacheWriter::new(Arc::clone(&cache), max_background_writes)),
            cache: Some(cache),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Attach a metrics sink (builder pattern).
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn client(&self) -> &EmbeddingClient {
        &self.client
    }

    pub fn cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.cache.as_ref()
    }

    pub fn writer(&self) -> Option<&CacheWriter> {
        self.writer.as_ref()
    }

    /// Return the cached embedding or generate and cache a new one.
    pub async fn get_or_create(
        &self,
        text: &str,
        model: &str,
        options: &EmbeddingOptions,
    ) -> Result<EmbeddingOutcome, EmbeddingError> {
        let max_input_length = self.client.registry().require(model)?.max_input_length;
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }

        if let Some(vector) = self.lookup(text, model, options).await {
            return Ok(EmbeddingOutcome {
                vector,
                cache_hit: true,
                truncated: text.chars().count() > max_input_length,
            });
        }

        let generated = self.client.generate(text, model, options).await?;
        if let Some(writer) = &self.writer {
            writer.submit(CacheItem {
                text: text.to_string(),
                model: model.to_string(),
                embedding: generated.vector.clone(),
                options: options.clone(),
            });
        }

        Ok(EmbeddingOutcome {
            vector: generated.vector,
            cache_hit: false,
            truncated: generated.truncated,
        })
    }

    /// Batch form of [`get_or_create`](Self::get_or_create); element `i`
    /// belongs to `texts[i]`.
    pub async fn batch_get_or_create<T>(
        &self,
        texts: &[T],
        model: &str,
        options: &EmbeddingOptions,
    ) -> Vec<Result<EmbeddingOutcome, EmbeddingError>>
    where
        T: AsRef<str> + Sync,
    {
        self.batch_get_or_create_until(texts, model, options, &CancellationToken::new())
            .await
    }

    /// Batch lookup with one generate pass for the misses and one pipelined
    /// cache write for the new vectors.
    pub async fn batch_get_or_create_until<T>(
        &self,
        texts: &[T],
        model: &str,
        options: &EmbeddingOptions,
        cancel: &CancellationToken,
    ) -> Vec<Result<EmbeddingOutcome, EmbeddingError>>
    where
        T: AsRef<str> + Sync,
    {
        let max_input_length = match self.client.registry().require(model) {
            Ok(descriptor) => descriptor.max_input_length,
            Err(_) => {
                return texts
                    .iter()
                    .map(|_| Err(EmbeddingError::UnknownModel(model.to_string())))
                    .collect();
            }
        };
        let concurrency = self.client.config().batch_concurrency.max(1);

        let cached: Vec<Option<Vec<f32>>> = stream::iter(texts.iter())
            .map(|text| async move {
                let text = text.as_ref();
                if text.trim().is_empty() || cancel.is_cancelled() {
                    return None;
                }
                self.lookup(text, model, options).await
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut results: Vec<Option<Result<EmbeddingOutcome, EmbeddingError>>> =
            Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        for (i, hit) in cached.into_iter().enumerate() {
            match hit {
                Some(vector) => results.push(Some(Ok(EmbeddingOutcome {
                    vector,
                    cache_hit: true,
                    truncated: texts[i].as_ref().chars().count() > max_input_length,
                }))),
                None => {
                    miss_indices.push(i);
                    results.push(None);
                }
            }
        }

        debug!(
            total = texts.len(),
            hits = texts.len() - miss_indices.len(),
            misses = miss_indices.len(),
            "Batch cache lookup"
        );

        if !miss_indices.is_empty() {
            let miss_texts: Vec<&str> = miss_indices.iter().map(|&i| texts[i].as_ref()).collect();
            let generated = self
                .client
                .generate_batch_until(&miss_texts, model, options, concurrency, cancel)
                .await;

            let mut new_items = Vec::new();
            for (&i, result) in miss_indices.iter().zip(generated) {
                results[i] = Some(result.map(|embedding| {
                    if self.writer.is_some() {
                        new_items.push(CacheItem {
                            text: texts[i].as_ref().to_string(),
                            model: model.to_string(),
                            embedding: embedding.vector.clone(),
                            options: options.clone(),
                        });
                    }
                    EmbeddingOutcome {
                        vector: embedding.vector,
                        cache_hit: false,
                        truncated: embedding.truncated,
                    }
                }));
            }

            if let Some(writer) = &self.writer {
                writer.submit_batch(new_items);
            }
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or(Err(EmbeddingError::Cancelled)))
            .collect()
    }

    /// Wait for queued cache writes.
    pub async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    async fn lookup(&self, text: &str, model: &str, options: &EmbeddingOptions) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref()?;
        let hit = cache.get(text, model, options).await;
        let counter = if hit.is_some() {
            "embedding_cache_hits_total"
        } else {
            "embedding_cache_misses_total"
        };
        self.metrics.increment_counter(counter, &[("model", model)]);
        hit
    }
}
