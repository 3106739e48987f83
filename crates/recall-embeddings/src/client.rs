//! Embedding client: validation, truncation, retry, and batching on top of
//! an [`EmbeddingBackend`].
//!
//! Retries cover only [`EmbeddingError::BackendUnavailable`]. With the
//! default policy (3 attempts, 1s then 2s backoff, 10s per call) the worst
//! case is 33s, which fits inside the default 60s request deadline. Callers
//! with tighter deadlines will see retries cut short by cancellation: every
//! future here is cancel-safe and dropping it aborts the in-flight call.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use recall_types::{
    EmbeddingOptions, EmbeddingSettings, MetricsSink, ModelDescriptor, ModelRegistry, NoopMetrics,
};

use crate::backend::EmbeddingBackend;
use crate::error::EmbeddingError;
use crate::model::GeneratedEmbedding;

/// Retry policy for transient backend failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first call included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Cap on a single delay
    pub max_backoff: Duration,
    /// Growth factor between delays
    pub multiplier: f64,
    /// Randomization factor (0.0 = deterministic delays)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.multiplier,
            randomization_factor: self.jitter,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    /// Timeout for one backend call, distinct from the caller's deadline
    pub request_timeout: Duration,
    /// Default fan-out for batch calls
    pub batch_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(10),
            batch_concurrency: 8,
        }
    }
}

impl From<&EmbeddingSettings> for ClientConfig {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
                max_backoff: Duration::from_millis(settings.max_backoff_ms),
                ..RetryPolicy::default()
            },
            request_timeout: settings.request_timeout(),
            batch_concurrency: settings.batch_concurrency,
        }
    }
}

/// Client that turns text into vectors through a model backend.
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    registry: Arc<ModelRegistry>,
    metrics: Arc<dyn MetricsSink>,
    config: ClientConfig,
}

impl EmbeddingClient {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        registry: Arc<ModelRegistry>,
        config: ClientConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    /// Attach a metrics sink (builder pattern).
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Release the backend's pooled connections.
    pub async fn close(&self) {
        self.backend.close().await;
    }

    /// Generate an embedding for one text.
    ///
    /// Text longer than the model's `max_input_length` is truncated and the
    /// result is flagged; length alone never fails the call.
    pub async fn generate(
        &self,
        text: &str,
        model: &str,
        options: &EmbeddingOptions,
    ) -> Result<GeneratedEmbedding, EmbeddingError> {
        let descriptor = self.registry.require(model)?;
        let (input, truncated) = prepare_input(text, descriptor)?;
        let expected_dim = options.dimensions.unwrap_or(descriptor.dimensions);
        let labels = [("model", descriptor.name.as_str())];

        if truncated {
            debug!(
                model = %model,
                original_chars = text.chars().count(),
                max_input_length = descriptor.max_input_length,
                "Truncating embedding input"
            );
            self.metrics
                .increment_counter("embedding_truncations_total", &labels);
        }

        let start = Instant::now();
        let result = self
            .call_with_retry(model, &input, options, expected_dim)
            .await;
        let latency = start.elapsed();

        self.metrics.record_duration(
            "embedding_request_duration_seconds",
            &labels,
            latency.as_secs_f64(),
        );

        match result {
            Ok((vector, attempts)) => Ok(GeneratedEmbedding {
                vector,
                model: model.to_string(),
                truncated,
                latency,
                attempts,
            }),
            Err(e) => {
                self.metrics.increment_counter(
                    "embedding_errors_total",
                    &[("model", descriptor.name.as_str()), ("kind", e.kind())],
                );
                Err(e)
            }
        }
    }

    /// Generate embeddings for many texts with the configured fan-out.
    pub async fn generate_batch<T>(
        &self,
        texts: &[T],
        model: &str,
        options: &EmbeddingOptions,
    ) -> Vec<Result<GeneratedEmbedding, EmbeddingError>>
    where
        T: AsRef<str> + Sync,
    {
        self.generate_batch_until(
            texts,
            model,
            options,
            self.config.batch_concurrency,
            &CancellationToken::new(),
        )
        .await
    }

    /// Generate embeddings for many texts, at most `concurrency` in flight.
    ///
    /// Element `i` of the result belongs to `texts[i]` regardless of
    /// completion order. One failing text does not affect the others. Once
    /// `cancel` fires no further backend calls are started; unfinished items
    /// report [`EmbeddingError::Cancelled`].
    pub async fn generate_batch_until<T>(
        &self,
        texts: &[T],
        model: &str,
        options: &EmbeddingOptions,
        concurrency: usize,
        cancel: &CancellationToken,
    ) -> Vec<Result<GeneratedEmbedding, EmbeddingError>>
    where
        T: AsRef<str> + Sync,
    {
        if texts.is_empty() {
            return Vec::new();
        }

        debug!(count = texts.len(), model = %model, concurrency, "Embedding batch");

        let results: Vec<_> = stream::iter(texts.iter())
            .map(|text| async move {
                if cancel.is_cancelled() {
                    return Err(EmbeddingError::Cancelled);
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(EmbeddingError::Cancelled),
                    result = self.generate(text.as_ref(), model, options) => result,
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(count = results.len(), failed, "Batch complete");
        results
    }

    /// Call the backend, retrying transient failures with exponential backoff.
    async fn call_with_retry(
        &self,
        model: &str,
        input: &str,
        options: &EmbeddingOptions,
        expected_dim: usize,
    ) -> Result<(Vec<f32>, u32), EmbeddingError> {
        let policy = &self.config.retry;
        let mut backoff = policy.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let outcome = match tokio::time::timeout(
                self.config.request_timeout,
                self.backend.embed(model, input, options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::BackendUnavailable(format!(
                    "request timed out after {}ms",
                    self.config.request_timeout.as_millis()
                ))),
            };

            let err = match outcome {
                Ok(vector) if vector.len() == expected_dim => return Ok((vector, attempts)),
                Ok(vector) => {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: expected_dim,
                        actual: vector.len(),
                    })
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if attempts >= policy.max_attempts {
                error!(model = %model, attempts, error = %err, "Max retries exceeded");
                return Err(err);
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        model = %model,
                        attempt = attempts,
                        error = %err,
                        retry_in_ms = delay.as_millis(),
                        "Embedding call failed, retrying"
                    );
                    self.metrics
                        .increment_counter("embedding_retries_total", &[("model", model)]);
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(model = %model, error = %err, "Backoff exhausted");
                    return Err(err);
                }
            }
        }
    }
}

/// Validate text and cut it to the model's maximum input length.
fn prepare_input<'a>(
    text: &'a str,
    descriptor: &ModelDescriptor,
) -> Result<(Cow<'a, str>, bool), EmbeddingError> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::InvalidInput(
            "text must not be empty".to_string(),
        ));
    }

    match text.char_indices().nth(descriptor.max_input_length) {
        Some((byte_idx, _)) => Ok((Cow::Borrowed(&text[..byte_idx]), true)),
        None => Ok((Cow::Borrowed(text), false)),
    }
}
