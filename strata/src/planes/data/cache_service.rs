use crate::domain::{CacheHealth, ConnectionState, MetricsSnapshot, SetOptions};
use crate::keys::{self, full_key, tag_index_ttl, tag_key};
use crate::metrics::CacheMetrics;
use crate::planes::control::invalidator::Invalidator;
use crate::planes::data::adapter::StoreAdapter;
use crate::ports::RemoteStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result, TtlSecs};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

const DELETE_BATCH: usize = 500;

/// L2 cache service: key namespacing, TTLs, tag indexing and metrics over
/// whichever store the [`StoreAdapter`] currently selects.
///
/// Every operation is fail-open. Store errors degrade the single call
/// (`None`, `false`, `0`) and are logged; they are never returned.
pub struct CacheService {
    adapter: StoreAdapter,
    metrics: CacheMetrics,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl CacheService {
    pub const DEFAULT_TTL: TtlSecs = TtlSecs(3600);

    pub fn new(adapter: StoreAdapter) -> Self {
        Self {
            adapter,
            metrics: CacheMetrics::new(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.adapter.state()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, prefix: &str) -> Option<T> {
        self.get_with_bytes(key, prefix)
            .await
            .map(|(value, _)| value)
    }

    /// Decoded value together with the stored bytes it came from. A value
    /// that fails to decode counts as a miss.
    pub async fn get_with_bytes<T: DeserializeOwned>(
        &self,
        key: &str,
        prefix: &str,
    ) -> Option<(T, Vec<u8>)> {
        let full_key = full_key(prefix, key);
        let Some(bytes) = self.lookup(&full_key).await else {
            self.metrics.record_miss();
            return None;
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.metrics.record_hit();
                Some((value, bytes))
            }
            Err(e) => {
                log_failure("get", &full_key, &Error::from(e));
                self.metrics.record_miss();
                None
            }
        }
    }

    async fn lookup(&self, full_key: &str) -> Option<Vec<u8>> {
        match self.adapter.backend().store().get(full_key).await {
            Ok(found) => {
                tracing::debug!(key = %full_key, hit = found.is_some(), "L2 get");
                found
            }
            Err(e) => {
                log_failure("get", full_key, &e);
                None
            }
        }
    }

    /// Return the cached value, or run `fetcher`, cache its result and
    /// return it. Fetcher errors are returned unchanged.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        opts: &SetOptions,
        fetcher: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        if let Some(value) = self.get::<T>(key, &opts.prefix).await {
            return Ok(value);
        }
        let value = fetcher().await?;
        self.set(key, &value, opts).await;
        Ok(value)
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, opts: &SetOptions) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set_bytes(key, bytes, opts).await,
            Err(e) => {
                log_failure("set", &full_key(&opts.prefix, key), &Error::from(e));
                false
            }
        }
    }

    /// Write already-encoded bytes and index them under `opts.tags`.
    ///
    /// The write runs on its own task and is awaited, so a caller that is
    /// cancelled mid-write cannot leave the entry and its index half done.
    pub async fn set_bytes(&self, key: &str, bytes: Vec<u8>, opts: &SetOptions) -> bool {
        let full_key = full_key(&opts.prefix, key);
        let store = self.adapter.backend().into_store();
        let write = write_entry(store, full_key.clone(), bytes, opts.ttl.0, opts.tags.clone());

        let result = match tokio::spawn(write).await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("cache write task failed: {e}"))),
        };

        match result {
            Ok(()) => {
                self.metrics.record_set();
                tracing::debug!(key = %full_key, ttl_secs = opts.ttl.0, tags = ?opts.tags, "L2 set");
                true
            }
            Err(e) => {
                log_failure("set", &full_key, &e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str, prefix: &str) -> bool {
        let full_key = full_key(prefix, key);
        match self
            .adapter
            .backend()
            .store()
            .delete(std::slice::from_ref(&full_key))
            .await
        {
            Ok(_) => {
                self.metrics.record_delete();
                tracing::debug!(key = %full_key, "L2 delete");
                true
            }
            Err(e) => {
                log_failure("delete", &full_key, &e);
                false
            }
        }
    }

    /// Delete every key under `prefix` matching `pattern`; returns how many
    /// were removed.
    pub async fn delete_pattern(&self, pattern: &str, prefix: &str) -> u64 {
        let full_pattern = full_key(prefix, pattern);
        let backend = self.adapter.backend();
        let store = backend.store();

        let keys = match store.scan(&full_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                log_failure("delete_pattern", &full_pattern, &e);
                return 0;
            }
        };

        let mut removed = 0;
        for batch in keys.chunks(DELETE_BATCH) {
            match store.delete(batch).await {
                Ok(count) => removed += count,
                Err(e) => {
                    log_failure("delete_pattern", &full_pattern, &e);
                    break;
                }
            }
        }
        self.metrics.record_deletes(removed);
        tracing::debug!(pattern = %full_pattern, removed, "L2 delete by pattern");
        removed
    }

    /// Remove every entry indexed under any of `tags`; returns how many
    /// keys were removed. Tags that fail are logged and skipped.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> u64 {
        let backend = self.adapter.backend();
        let report = Invalidator::new(backend.store()).invalidate(tags).await;
        if !report.is_complete() {
            tracing::warn!(
                failed = ?report.failed_tags,
                removed = report.removed,
                "tag invalidation partially failed"
            );
        }
        self.metrics.record_deletes(report.removed);
        report.removed
    }

    pub async fn exists(&self, key: &str, prefix: &str) -> bool {
        let full_key = full_key(prefix, key);
        match self.adapter.backend().store().exists(&full_key).await {
            Ok(exists) => exists,
            Err(e) => {
                log_failure("exists", &full_key, &e);
                false
            }
        }
    }

    /// Remaining TTL in seconds; `-1` for no expiry, `-2` when absent or
    /// unknown.
    pub async fn get_ttl(&self, key: &str, prefix: &str) -> i64 {
        let full_key = full_key(prefix, key);
        match self.adapter.backend().store().ttl(&full_key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                log_failure("ttl", &full_key, &e);
                -2
            }
        }
    }

    pub async fn extend_ttl(&self, key: &str, ttl: TtlSecs, prefix: &str) -> bool {
        let full_key = full_key(prefix, key);
        match self.adapter.backend().store().expire(&full_key, ttl.0).await {
            Ok(extended) => extended,
            Err(e) => {
                log_failure("expire", &full_key, &e);
                false
            }
        }
    }

    pub async fn increment(&self, key: &str, by: i64, prefix: &str) -> Option<i64> {
        let full_key = full_key(prefix, key);
        match self.adapter.backend().store().incr_by(&full_key, by).await {
            Ok(value) => Some(value),
            Err(e) => {
                log_failure("incr", &full_key, &e);
                None
            }
        }
    }

    pub async fn decrement(&self, key: &str, by: i64, prefix: &str) -> Option<i64> {
        self.increment(key, by.checked_neg()?, prefix).await
    }

    /// Drop everything in the remote store's database.
    pub async fn clear(&self) -> bool {
        match self.adapter.backend().store().flush().await {
            Ok(()) => {
                tracing::info!("L2 cleared");
                true
            }
            Err(e) => {
                log_failure("flush", "*", &e);
                false
            }
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Status for health checks. Probes the remote store; changes nothing.
    pub async fn health(&self) -> CacheHealth {
        let state = self.adapter.state();
        let remote = self.adapter.remote().filter(|_| state.is_connected());

        let (stats, latency_ms) = match remote {
            Some(store) => {
                let stats = store.stats().await.unwrap_or_else(|e| {
                    log_failure("stats", "*", &e);
                    Default::default()
                });
                let latency = store
                    .ping()
                    .await
                    .ok()
                    .map(|rtt| rtt.as_secs_f64() * 1000.0);
                (stats, latency)
            }
            None => (Default::default(), None),
        };

        CacheHealth {
            healthy: state.is_connected(),
            mode: if remote.is_some() { "remote" } else { "null" },
            connection_state: state,
            total_keys: stats.total_keys,
            memory_bytes: stats.memory_bytes,
            hit_rate: self.metrics.snapshot().hit_rate,
            uptime_secs: self.started.elapsed().as_secs(),
            latency_ms,
            l1_entries: None,
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("adapter", &self.adapter)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl Default for SetOptions {
    fn default() -> Self {
        SetOptions::new(CacheService::DEFAULT_TTL, keys::DEFAULT_PREFIX)
    }
}

async fn write_entry(
    store: Arc<dyn RemoteStore>,
    full_key: String,
    value: Vec<u8>,
    ttl_secs: u64,
    tags: Vec<String>,
) -> Result<()> {
    store.set(&full_key, &value, ttl_secs).await?;
    if let Err(e) = index_entry(store.as_ref(), &full_key, ttl_secs, &tags).await {
        // An entry missing from its tag index would survive invalidation.
        if let Err(rollback) = store.delete(std::slice::from_ref(&full_key)).await {
            tracing::warn!(key = %full_key, error = %rollback, "failed to roll back unindexed entry");
        }
        return Err(e);
    }
    Ok(())
}

async fn index_entry(
    store: &dyn RemoteStore,
    full_key: &str,
    ttl_secs: u64,
    tags: &[String],
) -> Result<()> {
    let index = store.tag_index();
    let index_ttl = tag_index_ttl(ttl_secs);
    for tag in tags {
        index.add_member(&tag_key(tag), full_key, index_ttl).await?;
    }
    Ok(())
}

fn log_failure(op: &'static str, key: &str, error: &Error) {
    if let Error::Serialization(_) = error {
        tracing::error!(op, key = %key, error = %error, "cache value could not be encoded or decoded");
    } else if error.is_connection_failure() {
        tracing::warn!(op, key = %key, error = %error, "remote cache unreachable, continuing without cache");
    } else {
        tracing::warn!(op, key = %key, error = %error, "cache operation failed, continuing without cache");
    }
}
