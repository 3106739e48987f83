//! # recall-cache
//!
//! Embedding cache for the vector-recall pipeline.
//!
//! Entries are keyed by a digest of (text, model, options), carry BLAKE3
//! fingerprints that are re-checked on every read, and are stored in a
//! versioned envelope that records whether the payload is zstd-compressed.
//! The cache fails open: store outages and invalid entries read as misses.

pub mod cache;
pub mod entry;
pub mod error;
pub mod key;
pub mod redis_store;
pub mod store;

pub use cache::{
    BatchResult, CacheConfig, CacheCountersSnapshot, CacheItem, CacheStats, CleanupReport,
    EmbeddingCache,
};
pub use entry::{CacheEntry, EnvelopeCodec};
pub use error::{CacheError, CacheStoreError};
pub use key::CacheKeyCodec;
pub use redis_store::RedisStore;
pub use store::{CacheStore, CacheWrite, InMemoryStore, KeyTtl, KeyspaceStats};
