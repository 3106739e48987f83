//! End-to-end test infrastructure for vector-recall.
//!
//! Provides a shared TestHarness wiring the real pipeline to in-process
//! backends: a deterministic stub embedder, the in-memory cache store, and
//! the in-memory vector index. Each backend exposes fault injection so
//! tests can exercise degraded paths.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use recall_cache::InMemoryStore;
use recall_embeddings::{EmbeddingBackend, EmbeddingError};
use recall_service::{Recall, RecallParts};
use recall_types::{EmbeddingOptions, InMemoryMetrics, Settings};
use recall_vector::{InMemoryVectorBackend, VectorPoint};

/// Embedding backend producing a deterministic unit vector per
/// (model, input) pair.
pub struct StubEmbedder {
    calls: AtomicUsize,
    transient_failures: AtomicUsize,
    rejected: Mutex<HashSet<String>>,
    delay_ms: AtomicU64,
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            rejected: Mutex::new(HashSet::new()),
            delay_ms: AtomicU64::new(0),
        }
    }

    /// Backend calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` calls with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Permanently reject a specific input.
    pub fn reject(&self, input: &str) {
        self.rejected
            .lock()
            .expect("rejected set poisoned")
            .insert(input.to_string());
    }

    /// Delay every call.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The vector this backend returns for `input`.
    pub fn vector_for(model: &str, input: &str, dimension: usize) -> Vec<f32> {
        let seed = input
            .bytes()
            .chain(model.bytes())
            .fold(0xcbf2_9ce4_8422_2325_u64, |h, b| {
                (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3)
            });
        let mut rng = StdRng::seed_from_u64(seed);
        let raw: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt().max(f32::EPSILON);
        raw.into_iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl EmbeddingBackend for StubEmbedder {
    fn name(&self) -> &str {
        "stub"
    }

    async fn embed(
        &self,
        model: &str,
        input: &str,
        options: &EmbeddingOptions,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(EmbeddingError::BackendUnavailable(
                "stub backend unavailable".to_string(),
            ));
        }
        if self
            .rejected
            .lock()
            .expect("rejected set poisoned")
            .contains(input)
        {
            return Err(EmbeddingError::BackendRejected(format!(
                "stub rejected input {:?}",
                input
            )));
        }

        let dimension = options.dimensions.unwrap_or_else(|| dimension_of(model));
        Ok(Self::vector_for(model, input, dimension))
    }
}

fn dimension_of(model: &str) -> usize {
    recall_types::ModelRegistry::builtin()
        .describe(model)
        .map(|m| m.dimensions)
        .unwrap_or(8)
}

/// Shared test harness for E2E tests.
pub struct TestHarness {
    pub settings: Settings,
    pub embedder: Arc<StubEmbedder>,
    pub cache_store: Arc<InMemoryStore>,
    pub vectors: Arc<InMemoryVectorBackend>,
    pub metrics: Arc<InMemoryMetrics>,
    pub recall: Recall,
}

impl TestHarness {
    /// Harness with default settings tuned for fast retries.
    pub fn new() -> Self {
        Self::with_vector_backend(InMemoryVectorBackend::new())
    }

    /// Harness over a specific vector backend configuration.
    pub fn with_vector_backend(vectors: InMemoryVectorBackend) -> Self {
        Self::build(test_settings(), vectors)
    }

    /// Harness with custom settings.
    pub fn with_settings(settings: Settings) -> Self {
        Self::build(settings, InMemoryVectorBackend::new())
    }

    fn build(settings: Settings, vectors: InMemoryVectorBackend) -> Self {
        let embedder = Arc::new(StubEmbedder::new());
        let cache_store = Arc::new(InMemoryStore::new());
        let vectors = Arc::new(vectors);
        let metrics = Arc::new(InMemoryMetrics::new());

        let recall = Recall::from_parts(
            &settings,
            RecallParts {
                embedding_backend: embedder.clone(),
                cache_store: Some(cache_store.clone()),
                vector_backend: vectors.clone(),
                metrics: metrics.clone(),
            },
        )
        .expect("Failed to assemble pipeline");

        Self {
            settings,
            embedder,
            cache_store,
            vectors,
            metrics,
            recall,
        }
    }

    /// Wait for background cache writes to land.
    pub async fn flush(&self) {
        self.recall.embeddings().flush().await;
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Default settings with millisecond backoff.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.initial_backoff_ms = 1;
    settings.embedding.max_backoff_ms = 5;
    settings.embedding.request_timeout_secs = 2;
    settings
}

/// Points whose vectors are the stub embedding of each text, with the
/// text stored under `payload.text`.
pub fn points_for(model: &str, dimension: usize, docs: &[(&str, &str)]) -> Vec<VectorPoint> {
    docs.iter()
        .map(|(id, text)| {
            let mut payload = serde_json::Map::new();
            payload.insert("text".to_string(), serde_json::Value::from(*text));
            VectorPoint::new(*id, StubEmbedder::vector_for(model, text, dimension))
                .with_payload(payload)
        })
        .collect()
}
