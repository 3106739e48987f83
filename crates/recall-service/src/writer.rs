//! Bounded background cache writes.
//!
//! Writes run on spawned tasks so callers never wait on the cache. At most
//! `capacity` writes are in flight; beyond that new writes are dropped and
//! counted rather than queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use recall_cache::{CacheItem, EmbeddingCache};

#[derive(Debug, Default)]
struct WriterCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of writer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub submitted: u64,
    /// Writes skipped because the writer was saturated
    pub dropped: u64,
    /// Items the cache failed to store
    pub failed: u64,
}

/// Fire-and-forget writer in front of an [`EmbeddingCache`].
pub struct CacheWriter {
    cache: Arc<EmbeddingCache>,
    permits: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<WriterCounters>,
}

impl CacheWriter {
    pub fn new(cache: Arc<EmbeddingCache>, capacity: usize) -> Self {
        // acquire_many takes a u32, so flush needs the capacity to fit one.
        let capacity = capacity.clamp(1, (u32::MAX as usize).min(Semaphore::MAX_PERMITS));
        Self {
            cache,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(WriterCounters::default()),
        }
    }

    /// Queue one item. Returns false if it was dropped.
    pub fn submit(&self, item: CacheItem) -> bool {
        self.submit_batch(vec![item])
    }

    /// Queue items as one pipelined write. Returns false if they were dropped.
    pub fn submit_batch(&self, items: Vec<CacheItem>) -> bool {
        if items.is_empty() {
            return true;
        }
        let count = items.len() as u64;

        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.dropped.fetch_add(count, Ordering::Relaxed);
                warn!(count, "Cache writer saturated, dropping write");
                return false;
            }
        };
        self.counters.submitted.fetch_add(count, Ordering::Relaxed);

        let cache = Arc::clone(&self.cache);
        let counters = Arc::clone(&self.counters);
        tokio::spawn(async move {
            let _permit = permit;
            let result = if items.len() == 1 {
                let item = &items[0];
                match cache
                    .store(&item.text, &item.model, &item.embedding, &item.options, None)
                    .await
                {
                    Ok(()) => 0,
                    Err(e) => {
                        debug!(model = %item.model, error = %e, "Background cache write failed");
                        1
                    }
                }
            } else {
                cache.store_batch(&items, None).await.failed as u64
            };
            if result > 0 {
                counters.failed.fetch_add(result, Ordering::Relaxed);
            }
        });
        true
    }

    /// Wait until every write submitted so far has finished.
    pub async fn flush(&self) {
        if let Ok(all) = self.permits.acquire_many(self.capacity as u32).await {
            drop(all);
        }
    }

    /// Maximum writes in flight.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
