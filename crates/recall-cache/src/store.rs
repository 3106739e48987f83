//! Key-value store seam for the embedding cache.
//!
//! The cache only needs a Redis-shaped subset: get/set with TTL, delete,
//! pipelined writes, prefix scans, and TTL inspection. [`InMemoryStore`]
//! implements it in-process; [`RedisStore`](crate::RedisStore) talks
//! to a Redis server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::CacheStoreError;

/// One write in a pipelined batch.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl: Option<Duration>,
}

/// TTL state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without expiry
    Persistent,
    /// Key expires after the given duration
    Expires(Duration),
}

/// Aggregate size of a keyspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyspaceStats {
    pub keys: u64,
    pub bytes: u64,
}

/// Trait for cache storage backends.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheStoreError>;

    /// Atomically replace the value at `key`.
    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError>;

    /// Send many writes in one round trip.
    ///
    /// The outer error means the pipeline never ran; otherwise element `i`
    /// is the outcome of `writes[i]`.
    async fn set_pipelined(
        &self,
        writes: Vec<CacheWrite>,
    ) -> Result<Vec<Result<(), CacheStoreError>>, CacheStoreError>;

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheStoreError>;

    /// Set expiry on an existing key. Returns false if the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheStoreError>;

    async fn keyspace(&self, prefix: &str) -> Result<KeyspaceStats, CacheStoreError>;

    async fn ping(&self) -> Result<(), CacheStoreError>;

    /// Release connections. Later calls fail with [`CacheStoreError::Closed`].
    async fn close(&self);
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Writes between full sweeps of expired entries.
const SWEEP_INTERVAL: u64 = 256;

/// In-process store.
///
/// Expired entries are dropped when read, on every scan and pipelined
/// write, and by a full sweep every [`SWEEP_INTERVAL`] single writes.
///
/// Also used as a fault-injection double: [`set_available`](Self::set_available)
/// simulates an outage, [`set_latency`](Self::set_latency) slows every call,
/// and [`set_max_value_bytes`](Self::set_max_value_bytes) rejects oversized
/// writes individually.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    unavailable: AtomicBool,
    closed: AtomicBool,
    latency_ms: AtomicU64,
    max_value_bytes: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle a simulated outage.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay added to every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Reject individual writes above this size (None = unlimited).
    pub fn set_max_value_bytes(&self, limit: Option<usize>) {
        self.max_value_bytes
            .store(limit.map_or(0, |l| l as u64), Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|e| e.values().filter(|v| v.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self) -> Result<MutexGuard<'_, HashMap<String, StoredValue>>, CacheStoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheStoreError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheStoreError::Unavailable(
                "connection refused".to_string(),
            ));
        }
        self.entries
            .lock()
            .map_err(|_| CacheStoreError::Unavailable("store lock poisoned".to_string()))
    }

    fn check_size(&self, value: &[u8]) -> Result<(), CacheStoreError> {
        let limit = self.max_value_bytes.load(Ordering::SeqCst);
        if limit > 0 && value.len() as u64 > limit {
            return Err(CacheStoreError::Unavailable(format!(
                "value of {} bytes exceeds limit {}",
                value.len(),
                limit
            )));
        }
        Ok(())
    }

    fn write(
        entries: &mut HashMap<String, StoredValue>,
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        entries.insert(key, StoredValue { value, expires_at });
    }

    fn purge_expired(entries: &mut HashMap<String, StoredValue>) {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, v| v.is_live(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!(purged, "Dropped expired cache entries");
        }
    }

    /// Live entry for `key`, dropping it if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, StoredValue>,
        key: &str,
    ) -> Option<&'a mut StoredValue> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|v| !v.is_live(now)) {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheStoreError> {
        let mut entries = self.enter().await?;
        Ok(Self::live(&mut entries, key).map(|v| v.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError> {
        self.check_size(&value)?;
        let mut entries = self.enter().await?;
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_INTERVAL == SWEEP_INTERVAL - 1 {
            Self::purge_expired(&mut entries);
        }
        Self::write(&mut entries, key.to_string(), value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let mut entries = self.enter().await?;
        let existed = Self::live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn set_pipelined(
        &self,
        writes: Vec<CacheWrite>,
    ) -> Result<Vec<Result<(), CacheStoreError>>, CacheStoreError> {
        let mut entries = self.enter().await?;
        debug!(count = writes.len(), "Pipelined cache write");
        Self::purge_expired(&mut entries);

        Ok(writes
            .into_iter()
            .map(|write| -> Result<(), CacheStoreError> {
                self.check_size(&write.value)?;
                Self::write(&mut entries, write.key, write.value, write.ttl);
                Ok(())
            })
            .collect())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError> {
        let mut entries = self.enter().await?;
        Self::purge_expired(&mut entries);
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheStoreError> {
        let mut entries = self.enter().await?;
        let now = Instant::now();
        Ok(match Self::live(&mut entries, key) {
            None => KeyTtl::Missing,
            Some(StoredValue {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(StoredValue {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheStoreError> {
        let mut entries = self.enter().await?;
        Ok(match Self::live(&mut entries, key) {
            Some(stored) => {
                stored.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        })
    }

    async fn keyspace(&self, prefix: &str) -> Result<KeyspaceStats, CacheStoreError> {
        let mut entries = self.enter().await?;
        Self::purge_expired(&mut entries);
        Ok(entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .fold(KeyspaceStats::default(), |mut stats, (k, v)| {
                stats.keys += 1;
                stats.bytes += (k.len() + v.value.len()) as u64;
                stats
            }))
    }

    async fn ping(&self) -> Result<(), CacheStoreError> {
        self.enter().await.map(|_| ())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
