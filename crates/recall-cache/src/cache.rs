//! Embedding cache over a [`CacheStore`].
//!
//! Fail-open: a read that cannot reach the store, times out, or finds an
//! entry that does not validate is reported as a miss. Invalid entries are
//! deleted so the next write replaces them cleanly.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use recall_types::{CacheSettings, EmbeddingOptions};

use crate::entry::{CacheEntry, EnvelopeCodec};
use crate::error::{CacheError, CacheStoreError};
use crate::key::CacheKeyCodec;
use crate::store::{CacheStore, CacheWrite, KeyTtl};

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub key_prefix: String,
    /// TTL applied when a write does not name one
    pub default_ttl: Duration,
    /// Payloads larger than this are compressed
    pub compression_threshold: usize,
    pub compression_level: i32,
    /// Timeout for each store operation
    pub op_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::from(&CacheSettings::default())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            key_prefix: settings.key_prefix.clone(),
            default_ttl: settings.ttl(),
            compression_threshold: settings.compression_threshold_bytes,
            compression_level: settings.compression_level,
            op_timeout: settings.op_timeout(),
        }
    }
}

/// Running cache counters.
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub read_errors: AtomicU64,
    pub fingerprint_mismatches: AtomicU64,
    pub corrupt_entries: AtomicU64,
    pub expired_entries: AtomicU64,
    pub stores: AtomicU64,
    pub store_failures: AtomicU64,
}

impl CacheCounters {
    pub fn snapshot(&self) -> CacheCountersSnapshot {
        CacheCountersSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            fingerprint_mismatches: self.fingerprint_mismatches.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            expired_entries: self.expired_entries.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCountersSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub read_errors: u64,
    pub fingerprint_mismatches: u64,
    pub corrupt_entries: u64,
    pub expired_entries: u64,
    pub stores: u64,
    pub store_failures: u64,
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0.0 before any lookup
    pub hit_rate: f64,
    pub total_keys: u64,
    pub total_bytes: u64,
}

/// Outcome of a batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub stored: usize,
    pub failed: usize,
    /// Encoded bytes successfully written
    pub bytes: u64,
}

/// Outcome of a TTL sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub ttl_applied: usize,
}

/// One item of a batch write.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub text: String,
    pub model: String,
    pub embedding: Vec<f32>,
    pub options: EmbeddingOptions,
}

/// Why a stored entry was discarded on read.
#[derive(Debug)]
enum Rejection {
    Corrupt(CacheError),
    FingerprintMismatch,
    ModelMismatch,
    OptionsMismatch,
    Expired,
}

/// Cache of embeddings keyed by (text, model, options).
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    keys: CacheKeyCodec,
    envelope: EnvelopeCodec,
    config: CacheConfig,
    counters: CacheCounters,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            keys: CacheKeyCodec::new(config.key_prefix.clone()),
            envelope: EnvelopeCodec::new(config.compression_threshold, config.compression_level),
            store,
            config,
            counters: CacheCounters::default(),
        }
    }

    pub fn keys(&self) -> &CacheKeyCodec {
        &self.keys
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Name of the underlying store (`"memory"`, `"redis"`).
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    pub fn counters(&self) -> CacheCountersSnapshot {
        self.counters.snapshot()
    }

    /// Look up a cached embedding. Never fails; problems read as a miss.
    pub async fn get(
        &self,
        text: &str,
        model: &str,
        options: &EmbeddingOptions,
    ) -> Option<Vec<f32>> {
        let key = self.keys.key(text, model, options);

        let raw = match self.timed(self.store.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache miss");
                return None;
            }
            Err(e) => {
                self.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match self.validate(&raw, text, model, options) {
            Ok(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(entry.embedding)
            }
            Err(rejection) => {
                match &rejection {
                    Rejection::FingerprintMismatch
                    | Rejection::ModelMismatch
                    | Rejection::OptionsMismatch => {
                        self.counters
                            .fingerprint_mismatches
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Rejection::Corrupt(_) => {
                        self.counters.corrupt_entries.fetch_add(1, Ordering::Relaxed);
                    }
                    Rejection::Expired => {
                        self.counters.expired_entries.fetch_add(1, Ordering::Relaxed);
                    }
                }
                warn!(key = %key, reason = ?rejection, "Discarding invalid cache entry");
                self.evict(&key).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an embedding, using the default TTL when `ttl` is None.
    pub async fn store(
        &self,
        text: &str,
        model: &str,
        embedding: &[f32],
        options: &EmbeddingOptions,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let key = self.keys.key(text, model, options);
        let bytes = self.encode(text, model, embedding, options, ttl)?;
        let size = bytes.len();

        match self.timed(self.store.set(&key, bytes, Some(ttl))).await {
            Ok(()) => {
                self.counters.stores.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, bytes = size, "Cached embedding");
                Ok(())
            }
            Err(e) => {
                self.counters.store_failures.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }

    /// Store many embeddings in one pipelined round trip.
    ///
    /// Items that fail to encode are counted as failed and never sent.
    pub async fn store_batch(&self, items: &[CacheItem], ttl: Option<Duration>) -> BatchResult {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut result = BatchResult::default();
        let mut writes = Vec::with_capacity(items.len());

        for item in items {
            match self.encode(&item.text, &item.model, &item.embedding, &item.options, ttl) {
                Ok(value) => writes.push(CacheWrite {
                    key: self.keys.key(&item.text, &item.model, &item.options),
                    value,
                    ttl: Some(ttl),
                }),
                Err(e) => {
                    warn!(model = %item.model, error = %e, "Skipping unencodable cache item");
                    result.failed += 1;
                }
            }
        }

        if writes.is_empty() {
            self.record_batch(&result);
            return result;
        }

        let sizes: Vec<u64> = writes.iter().map(|w| w.value.len() as u64).collect();
        let count = writes.len();

        match self.timed(self.store.set_pipelined(writes)).await {
            Ok(outcomes) => {
                for (outcome, size) in outcomes.iter().zip(&sizes) {
                    match outcome {
                        Ok(()) => {
                            result.stored += 1;
                            result.bytes += size;
                        }
                        Err(e) => {
                            debug!(error = %e, "Pipelined cache write failed");
                            result.failed += 1;
                        }
                    }
                }
                // A short reply means the tail was never acknowledged.
                result.failed += count.saturating_sub(outcomes.len());
            }
            Err(e) => {
                warn!(count, error = %e, "Pipelined cache write failed");
                result.failed += count;
            }
        }

        self.record_batch(&result);
        debug!(
            stored = result.stored,
            failed = result.failed,
            bytes = result.bytes,
            "Cache batch stored"
        );
        result
    }

    /// Delete the entry for a request. Returns whether one existed.
    pub async fn invalidate(&self, text: &str, model: &str, options: &EmbeddingOptions) -> bool {
        let key = self.keys.key(text, model, options);
        match self.timed(self.store.delete(&key)).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache invalidate failed");
                false
            }
        }
    }

    /// Hit/miss counters plus the size of this cache's keyspace.
    ///
    /// If the store cannot be queried the keyspace figures read as zero.
    pub async fn stats(&self) -> CacheStats {
        let counters = self.counters.snapshot();
        let keyspace = match self.timed(self.store.keyspace(&self.keys.scan_prefix())).await {
            Ok(keyspace) => keyspace,
            Err(e) => {
                warn!(error = %e, "Cache keyspace query failed");
                Default::default()
            }
        };

        let lookups = counters.hits + counters.misses;
        CacheStats {
            hits: counters.hits,
            misses: counters.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                counters.hits as f64 / lookups as f64
            },
            total_keys: keyspace.keys,
            total_bytes: keyspace.bytes,
        }
    }

    /// Apply the default TTL to keys under this cache's prefix that have none.
    pub async fn cleanup(&self) -> Result<CleanupReport, CacheError> {
        let keys = self
            .timed(self.store.scan_keys(&self.keys.scan_prefix()))
            .await?;
        let mut report = CleanupReport {
            scanned: keys.len(),
            ttl_applied: 0,
        };

        for key in &keys {
            match self.timed(self.store.ttl(key)).await {
                Ok(KeyTtl::Persistent) => {
                    match self
                        .timed(self.store.expire(key, self.config.default_ttl))
                        .await
                    {
                        Ok(true) => report.ttl_applied += 1,
                        Ok(false) => {}
                        Err(e) => warn!(key = %key, error = %e, "Failed to apply TTL"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Failed to read TTL"),
            }
        }

        info!(
            scanned = report.scanned,
            ttl_applied = report.ttl_applied,
            "Cache cleanup complete"
        );
        Ok(report)
    }

    /// Check that the store answers.
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.timed(self.store.ping()).await.map_err(Into::into)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    fn encode(
        &self,
        text: &str,
        model: &str,
        embedding: &[f32],
        options: &EmbeddingOptions,
        ttl: Duration,
    ) -> Result<Vec<u8>, CacheError> {
        if embedding.is_empty() {
            return Err(CacheError::Encode("embedding is empty".to_string()));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(CacheError::Encode(
                "embedding contains non-finite values".to_string(),
            ));
        }

        let entry = CacheEntry {
            embedding: embedding.to_vec(),
            model: model.to_string(),
            text_fingerprint: CacheKeyCodec::fingerprint(text),
            options_fingerprint: CacheKeyCodec::options_fingerprint(options),
            created_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
        };
        self.envelope.encode(&entry)
    }

    fn validate(
        &self,
        raw: &[u8],
        text: &str,
        model: &str,
        options: &EmbeddingOptions,
    ) -> Result<CacheEntry, Rejection> {
        let entry = self.envelope.decode(raw).map_err(Rejection::Corrupt)?;

        if entry.text_fingerprint != CacheKeyCodec::fingerprint(text) {
            return Err(Rejection::FingerprintMismatch);
        }
        if entry.model != model {
            return Err(Rejection::ModelMismatch);
        }
        if entry.options_fingerprint != CacheKeyCodec::options_fingerprint(options) {
            return Err(Rejection::OptionsMismatch);
        }
        if entry.is_expired(Utc::now()) {
            return Err(Rejection::Expired);
        }
        Ok(entry)
    }

    async fn evict(&self, key: &str) {
        if let Err(e) = self.timed(self.store.delete(key)).await {
            debug!(key = %key, error = %e, "Failed to delete invalid cache entry");
        }
    }

    fn record_batch(&self, result: &BatchResult) {
        self.counters
            .stores
            .fetch_add(result.stored as u64, Ordering::Relaxed);
        self.counters
            .store_failures
            .fetch_add(result.failed as u64, Ordering::Relaxed);
    }

    async fn timed<T>(
        &self,
        op: impl Future<Output = Result<T, CacheStoreError>>,
    ) -> Result<T, CacheStoreError> {
        match tokio::time::timeout(self.config.op_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheStoreError::Timeout(self.config.op_timeout)),
        }
    }
}
