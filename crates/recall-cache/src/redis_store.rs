//! Redis-backed [`CacheStore`].
//!
//! One multiplexed [`ConnectionManager`] is opened on first use and shared
//! by every operation; it reconnects on its own after a dropped connection.
//! TTLs are sent in milliseconds (`SET .. PX`, `PEXPIRE`, `PTTL`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::CacheStoreError;
use crate::store::{CacheStore, CacheWrite, KeyTtl, KeyspaceStats};

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Keys per `STRLEN` pipeline when sizing a keyspace.
const STRLEN_CHUNK: usize = 500;

/// Cache store on a Redis server.
pub struct RedisStore {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    closed: AtomicBool,
}

impl RedisStore {
    /// Parse `url` (`redis://host:port/db`, `rediss://..`, `unix://..`).
    ///
    /// No connection is made until the first operation.
    pub fn new(url: &str) -> Result<Self, CacheStoreError> {
        let client = Client::open(url)
            .map_err(|e| CacheStoreError::InvalidConfig(format!("cache.url {url:?}: {e}")))?;
        info!(addr = ?client.get_connection_info().addr, "Configured Redis cache store");
        Ok(Self {
            client,
            conn: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheStoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheStoreError::Closed);
        }
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("Opening Redis connection");
                ConnectionManager::new(self.client.clone()).await
            })
            .await
            .map_err(unavailable)?;
        Ok(conn.clone())
    }
}

fn unavailable(err: RedisError) -> CacheStoreError {
    CacheStoreError::Unavailable(err.to_string())
}

/// Milliseconds for a `PX`/`PEXPIRE` argument. Redis rejects 0.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// `SCAN MATCH` pattern for keys starting with `prefix`.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

/// Interpret a `PTTL` reply.
fn key_ttl(pttl: i64) -> KeyTtl {
    match pttl {
        -2 => KeyTtl::Missing,
        -1 => KeyTtl::Persistent,
        ms => KeyTtl::Expires(Duration::from_millis(ms.max(0) as u64)),
    }
}

fn set_cmd(key: &str, value: &[u8], ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ttl) = ttl {
        cmd.arg("PX").arg(ttl_millis(ttl));
    }
    cmd
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheStoreError> {
        let mut conn = self.connection().await?;
        set_cmd(key, &value, ttl)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        let mut conn = self.connection().await?;
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn set_pipelined(
        &self,
        writes: Vec<CacheWrite>,
    ) -> Result<Vec<Result<(), CacheStoreError>>, CacheStoreError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;

        let mut pipe = redis::pipe();
        for write in &writes {
            pipe.add_command(set_cmd(&write.key, &write.value, write.ttl))
                .ignore();
        }
        debug!(count = writes.len(), "Pipelined cache write");

        // A failed pipeline leaves no per-command outcome to report.
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(writes.iter().map(|_| Ok(())).collect())
    }

    async fn scan_keys(&self, prefix: &str) -> Result<Vec<String>, CacheStoreError> {
        let mut conn = self.connection().await?;
        let pattern = match_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl, CacheStoreError> {
        let mut conn = self.connection().await?;
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(key_ttl(pttl))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async::<_, bool>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn keyspace(&self, prefix: &str) -> Result<KeyspaceStats, CacheStoreError> {
        let keys = self.scan_keys(prefix).await?;
        let mut conn = self.connection().await?;
        let mut stats = KeyspaceStats::default();

        for chunk in keys.chunks(STRLEN_CHUNK) {
            let mut pipe = redis::pipe();
            for key in chunk {
                pipe.cmd("STRLEN").arg(key);
            }
            let lengths: Vec<u64> = pipe.query_async(&mut conn).await.map_err(unavailable)?;
            for (key, len) in chunk.iter().zip(lengths) {
                // Expired between SCAN and STRLEN
                if len == 0 {
                    continue;
                }
                stats.keys += 1;
                stats.bytes += key.len() as u64 + len;
            }
        }
        Ok(stats)
    }

    async fn ping(&self) -> Result<(), CacheStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed Redis cache store");
        }
    }
}
