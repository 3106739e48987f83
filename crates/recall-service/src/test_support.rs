//! Shared doubles for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use recall_embeddings::{
    ClientConfig, EmbeddingBackend, EmbeddingClient, EmbeddingError, RetryPolicy,
};
use recall_types::{EmbeddingOptions, ModelDescriptor, ModelRegistry, PerformanceTier};

/// Backend returning `[chars(input); dimension]` and counting calls.
pub struct CountingBackend {
    dimension: usize,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn embed(
        &self,
        _model: &str,
        input: &str,
        _options: &EmbeddingOptions,
    ) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![input.chars().count() as f32; self.dimension])
    }
}

/// Registry with a 4-dim, 10-char "tiny" model on top of the built-ins.
pub fn registry() -> ModelRegistry {
    ModelRegistry::builtin().with_model(ModelDescriptor::new("tiny", 4, 10, PerformanceTier::Fast))
}

pub fn client_with(backend: Arc<dyn EmbeddingBackend>) -> Arc<EmbeddingClient> {
    let config = ClientConfig {
        retry: RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        },
        request_timeout: Duration::from_secs(1),
        batch_concurrency: 4,
    };
    Arc::new(EmbeddingClient::new(backend, Arc::new(registry()), config))
}
