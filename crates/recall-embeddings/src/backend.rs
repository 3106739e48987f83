//! Model backend seam and the Ollama HTTP implementation.
//!
//! A backend performs exactly one call per `embed` invocation. Validation,
//! truncation, retry, and metrics belong to [`EmbeddingClient`](crate::EmbeddingClient).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use recall_types::EmbeddingOptions;

use crate::error::EmbeddingError;

/// Trait for embedding model backends.
///
/// Implementations must be thread-safe (Send + Sync); one instance is shared
/// by every request.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Generate one embedding. `input` has already been validated and truncated.
    async fn embed(
        &self,
        model: &str,
        input: &str,
        options: &EmbeddingOptions,
    ) -> Result<Vec<f32>, EmbeddingError>;

    /// Release pooled resources. Default is a no-op.
    async fn close(&self) {}
}

/// Configuration for the Ollama backend.
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    /// Base URL (e.g., "http://localhost:11434")
    pub base_url: String,

    /// Timeout for a single HTTP request
    pub timeout: Duration,

    /// Idle connections kept in the pool
    pub pool_max_idle: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(10),
            pool_max_idle: 16,
        }
    }
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Backend speaking Ollama's `/api/embed` protocol.
pub struct OllamaBackend {
    client: Client,
    config: OllamaConfig,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    options: Map<String, Value>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaBackend {
    /// Create a new backend with its own connection pool.
    pub fn new(config: OllamaConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle)
            .build()
            .map_err(|e| EmbeddingError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn build_request<'a>(
        model: &'a str,
        input: &'a str,
        options: &'a EmbeddingOptions,
    ) -> EmbedRequest<'a> {
        let mut model_options: Map<String, Value> = options
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(num_ctx) = options.num_ctx {
            model_options.insert("num_ctx".to_string(), Value::from(num_ctx));
        }

        EmbedRequest {
            model,
            input,
            keep_alive: options.keep_alive.as_deref(),
            dimensions: options.dimensions,
            options: model_options,
        }
    }
}

/// Map an HTTP status to the transient/permanent split.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> EmbeddingError {
    let message = format!("HTTP {}: {}", status, body);
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        EmbeddingError::BackendUnavailable(message)
    } else {
        EmbeddingError::BackendRejected(message)
    }
}

fn classify_transport(err: reqwest::Error) -> EmbeddingError {
    if err.is_decode() {
        EmbeddingError::BackendRejected(format!("malformed response: {}", err))
    } else {
        // connect, timeout, and mid-body failures are all worth another try
        EmbeddingError::BackendUnavailable(err.to_string())
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn embed(
        &self,
        model: &str,
        input: &str,
        options: &EmbeddingOptions,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/api/embed", self.config.base_url.trim_end_matches('/'));
        let request = Self::build_request(model, input, options);

        debug!(model = %model, chars = input.len(), "Calling embedding backend");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: EmbedResponse = response.json().await.map_err(classify_transport)?;

        body.embeddings.into_iter().next().ok_or_else(|| {
            EmbeddingError::BackendRejected("no embeddings in response".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> OllamaBackend {
        OllamaBackend::new(OllamaConfig::new(server.uri()).with_timeout(Duration::from_secs(2)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "all-minilm", "input": "hello"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.5, -0.25]]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let vector = backend(&server)
            .embed("all-minilm", "hello", &EmbeddingOptions::default())
            .await
            .unwrap();
        assert_eq!(vector, vec![0.5, -0.25]);
    }

    #[tokio::test]
    async fn test_options_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({
                "keep_alive": "5m",
                "dimensions": 2,
                "options": {"num_ctx": 2048, "seed": 7}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0]]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let options = EmbeddingOptions::new()
            .with_keep_alive("5m")
            .with_dimensions(2)
            .with_num_ctx(2048)
            .with_extra("seed", json!(7));
        let vector = backend(&server)
            .embed("all-minilm", "hello", &options)
            .await
            .unwrap();
        assert_eq!(vector.len(), 2);
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading model"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .embed("all-minilm", "hello", &EmbeddingOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_bad_request_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .embed("missing", "hello", &EmbeddingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::BackendRejected(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"vectors": []})))
            .mount(&server)
            .await;

        let err = backend(&server)
            .embed("all-minilm", "hello", &EmbeddingOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::BackendRejected(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let backend = OllamaBackend::new(
            OllamaConfig::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
        let err = backend
            .embed("all-minilm", "hello", &EmbeddingOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_transient());
    }
}
