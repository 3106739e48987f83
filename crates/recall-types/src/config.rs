//! Configuration loading for vector-recall.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/vector-recall/config.{toml,json,yaml}.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RecallError;
use crate::model::{ModelDescriptor, ModelRegistry, DEFAULT_MODEL};

/// Embedding model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Base URL of the model backend
    #[serde(default = "default_embedding_url")]
    pub base_url: String,

    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Timeout for a single backend call (seconds)
    #[serde(default = "default_embedding_timeout")]
    pub request_timeout_secs: u64,

    /// Total attempts for transient failures (first call included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay (milliseconds); doubles on each retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on a single retry delay (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Maximum concurrent backend calls inside one batch
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Idle connections kept per backend host
    #[serde(default = "default_pool_size")]
    pub pool_max_idle: usize,
}

fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_embedding_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    8000
}

fn default_batch_concurrency() -> usize {
    8
}

fn default_pool_size() -> usize {
    16
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            default_model: default_model(),
            request_timeout_secs: default_embedding_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            batch_concurrency: default_batch_concurrency(),
            pool_max_idle: default_pool_size(),
        }
    }
}

impl EmbeddingSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("embedding.request_timeout_secs must be > 0".to_string());
        }
        if self.max_attempts == 0 {
            return Err("embedding.max_attempts must be > 0".to_string());
        }
        if self.batch_concurrency == 0 {
            return Err("embedding.batch_concurrency must be > 0".to_string());
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(format!(
                "embedding.max_backoff_ms ({}) must be >= initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            ));
        }
        Ok(())
    }
}

/// Embedding cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Disable to bypass the cache entirely
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redis URL (`redis://host:6379/0`); unset keeps the cache in-process
    #[serde(default)]
    pub url: Option<String>,

    /// Key namespace prefix
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Entry time-to-live (seconds)
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Payloads larger than this are zstd-compressed (bytes)
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,

    /// zstd compression level
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Timeout for a single cache-store operation (milliseconds)
    #[serde(default = "default_cache_op_timeout")]
    pub op_timeout_ms: u64,

    /// Maximum cache writes running in the background at once
    #[serde(default = "default_background_writes")]
    pub max_background_writes: usize,
}

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    "emb".to_string()
}

fn default_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_compression_level() -> i32 {
    3
}

fn default_cache_op_timeout() -> u64 {
    250
}

fn default_background_writes() -> usize {
    64
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl(),
            compression_threshold_bytes: default_compression_threshold(),
            compression_level: default_compression_level(),
            op_timeout_ms: default_cache_op_timeout(),
            max_background_writes: default_background_writes(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(format!(
                "cache.key_prefix must be non-empty and contain no ':', got {:?}",
                self.key_prefix
            ));
        }
        if self.ttl_secs == 0 {
            return Err("cache.ttl_secs must be > 0".to_string());
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(format!(
                "cache.compression_level must be 1-22, got {}",
                self.compression_level
            ));
        }
        if self.op_timeout_ms == 0 {
            return Err("cache.op_timeout_ms must be > 0".to_string());
        }
        if self.max_background_writes == 0 {
            return Err("cache.max_background_writes must be > 0".to_string());
        }
        if let Some(url) = &self.url {
            if !["redis://", "rediss://", "unix://", "redis+unix://"]
                .iter()
                .any(|scheme| url.starts_with(scheme))
            {
                return Err(format!("cache.url must be a redis:// URL, got {url:?}"));
            }
        }
        Ok(())
    }
}

/// Which vector index implementation to connect to.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackendKind {
    /// Qdrant over its REST API (default)
    #[default]
    Qdrant,
    /// Process-local index; contents are lost on exit
    Memory,
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSettings {
    #[serde(default)]
    pub backend: VectorBackendKind,

    /// Base URL of the vector index
    #[serde(default = "default_vector_url")]
    pub url: String,

    /// API key (loaded from env var, not stored in config file)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for a single index call (seconds)
    #[serde(default = "default_vector_timeout")]
    pub request_timeout_secs: u64,

    /// Points per upsert request
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,

    /// Candidate multiplier when a filter has to be applied client-side
    #[serde(default = "default_filter_overfetch")]
    pub filter_overfetch: usize,

    /// Idle connections kept per backend host
    #[serde(default = "default_pool_size")]
    pub pool_max_idle: usize,
}

fn default_vector_url() -> String {
    "http://localhost:6333".to_string()
}

fn default_vector_timeout() -> u64 {
    10
}

fn default_upsert_batch_size() -> usize {
    100
}

fn default_filter_overfetch() -> usize {
    4
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            backend: VectorBackendKind::default(),
            url: default_vector_url(),
            api_key: None,
            request_timeout_secs: default_vector_timeout(),
            upsert_batch_size: default_upsert_batch_size(),
            filter_overfetch: default_filter_overfetch(),
            pool_max_idle: default_pool_size(),
        }
    }
}

impl VectorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout_secs == 0 {
            return Err("vector.request_timeout_secs must be > 0".to_string());
        }
        if self.upsert_batch_size == 0 {
            return Err("vector.upsert_batch_size must be > 0".to_string());
        }
        if self.filter_overfetch == 0 {
            return Err("vector.filter_overfetch must be > 0".to_string());
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub vector: VectorSettings,

    /// Extra models registered on top of the built-in table
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,

    /// Overall deadline for one externally visible request (seconds)
    #[serde(default = "default_request_deadline")]
    pub request_deadline_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_request_deadline() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedding: EmbeddingSettings::default(),
            cache: CacheSettings::default(),
            vector: VectorSettings::default(),
            models: Vec::new(),
            request_deadline_secs: default_request_deadline(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/vector-recall/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (RECALL__SECTION__KEY)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, RecallError> {
        let default_config_path = ProjectDirs::from("", "", "vector-recall")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| RecallError::Config(e.to_string()))?
            .set_default("request_deadline_secs", default_request_deadline() as i64)
            .map_err(|e| RecallError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Double underscore so keys like `ttl_secs` survive the split:
        // RECALL__CACHE__TTL_SECS -> cache.ttl_secs
        builder = builder.add_source(
            Environment::with_prefix("RECALL")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| RecallError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| RecallError::Config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), RecallError> {
        self.embedding.validate().map_err(RecallError::Config)?;
        self.cache.validate().map_err(RecallError::Config)?;
        self.vector.validate().map_err(RecallError::Config)?;
        if self.request_deadline_secs == 0 {
            return Err(RecallError::Config(
                "request_deadline_secs must be > 0".to_string(),
            ));
        }
        for model in &self.models {
            model
                .validate()
                .map_err(|e| RecallError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    /// Built-in model table plus any models declared in config.
    pub fn model_registry(&self) -> ModelRegistry {
        self.models
            .iter()
            .cloned()
            .fold(ModelRegistry::builtin(), |registry, model| {
                registry.with_model(model)
            })
    }
}
