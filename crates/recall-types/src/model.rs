//! Embedding model registry.
//!
//! Static table of the embedding models the pipeline knows how to call and
//! the contract each one carries: output dimensionality, maximum input
//! length (in characters), and a coarse latency tier.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RecallError;

/// Coarse latency/quality tier of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceTier {
    Fast,
    Balanced,
    Quality,
}

impl PerformanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Fast => "fast",
            PerformanceTier::Balanced => "balanced",
            PerformanceTier::Quality => "quality",
        }
    }
}

/// Contract for a single embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model name as the backend knows it (e.g., "nomic-embed-text")
    pub name: String,
    /// Length of every vector the model produces
    pub dimensions: usize,
    /// Maximum input length in characters; longer input is truncated
    pub max_input_length: usize,
    /// Latency tier
    pub performance_tier: PerformanceTier,
}

impl ModelDescriptor {
    pub fn new(
        name: impl Into<String>,
        dimensions: usize,
        max_input_length: usize,
        performance_tier: PerformanceTier,
    ) -> Self {
        Self {
            name: name.into(),
            dimensions,
            max_input_length,
            performance_tier,
        }
    }

    /// Validate descriptor values.
    pub fn validate(&self) -> Result<(), RecallError> {
        if self.name.trim().is_empty() {
            return Err(RecallError::InvalidInput(
                "model name must not be empty".to_string(),
            ));
        }
        if self.dimensions == 0 {
            return Err(RecallError::InvalidInput(format!(
                "model {} must have dimensions > 0",
                self.name
            )));
        }
        if self.max_input_length == 0 {
            return Err(RecallError::InvalidInput(format!(
                "model {} must have max_input_length > 0",
                self.name
            )));
        }
        Ok(())
    }
}

/// Default model used when callers do not name one.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";

/// Registry of supported embedding models.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelRegistry {
    /// Registry with no models.
    pub fn empty() -> Self {
        Self {
            models: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the models served by a stock Ollama install.
    pub fn builtin() -> Self {
        use PerformanceTier::*;

        [
            ModelDescriptor::new("nomic-embed-text", 768, 8192, Balanced),
            ModelDescriptor::new("mxbai-embed-large", 1024, 512, Quality),
            ModelDescriptor::new("all-minilm", 384, 256, Fast),
            ModelDescriptor::new("snowflake-arctic-embed", 1024, 512, Quality),
            ModelDescriptor::new("bge-m3", 1024, 8192, Quality),
        ]
        .into_iter()
        .fold(Self::empty(), |registry, model| registry.with_model(model))
    }

    /// Register (or replace) a model descriptor.
    pub fn with_model(mut self, descriptor: ModelDescriptor) -> Self {
        self.models.insert(descriptor.name.clone(), descriptor);
        self
    }

    /// Look up a model by name.
    ///
    /// An Ollama `:latest` tag is ignored, so `nomic-embed-text:latest`
    /// resolves to `nomic-embed-text`.
    pub fn describe(&self, model: &str) -> Option<&ModelDescriptor> {
        self.models
            .get(model)
            .or_else(|| model.strip_suffix(":latest").and_then(|m| self.models.get(m)))
    }

    /// Like [`describe`](Self::describe) but fails fast for unsupported names.
    pub fn require(&self, model: &str) -> Result<&ModelDescriptor, RecallError> {
        self.describe(model)
            .ok_or_else(|| RecallError::UnknownModel(model.to_string()))
    }

    /// Names of all registered models.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
