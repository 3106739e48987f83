//! # recall-types
//!
//! Shared types for the vector-recall pipeline.
//!
//! - Model registry: supported embedding models and their contracts
//! - Embedding options with a canonical, order-independent JSON form
//! - Metrics sink trait consumed by every component
//! - Layered settings loaded via the `config` crate

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod options;

pub use config::{CacheSettings, EmbeddingSettings, Settings, VectorBackendKind, VectorSettings};
pub use error::RecallError;
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use model::{ModelDescriptor, ModelRegistry, PerformanceTier, DEFAULT_MODEL};
pub use options::{canonicalize, EmbeddingOptions};
