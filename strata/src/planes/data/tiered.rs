use crate::domain::{CacheHealth, hit_rate};
use crate::keys::full_key;
use crate::planes::control::strategy::CacheStrategy;
use crate::planes::data::cache_service::CacheService;
use crate::planes::data::local_store::LocalStore;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the two-tier path, separate from the L2 service's own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct TieredMetrics {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub sets: u64,
    pub deletes: u64,
    /// `(l1_hits + l2_hits) / (l1_hits + l2_hits + misses)`.
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TieredMetrics {
        let l1_hits = self.l1_hits.load(Ordering::Relaxed);
        let l2_hits = self.l2_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        TieredMetrics {
            l1_hits,
            l2_hits,
            misses,
            fetches: self.fetches.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: hit_rate(l1_hits + l2_hits, misses),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.l1_hits,
            &self.l2_hits,
            &self.misses,
            &self.fetches,
            &self.sets,
            &self.deletes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// L1 in front of L2 behind one `get_or_set` contract.
///
/// Both tiers hold the same JSON encoding, so an L2 hit is copied into L1
/// without re-encoding. Tiers may disagree for at most the L1 TTL.
#[derive(Debug)]
pub struct TieredCache {
    local: Arc<LocalStore>,
    remote: Arc<CacheService>,
    counters: Counters,
}

impl TieredCache {
    pub fn new(local: Arc<LocalStore>, remote: Arc<CacheService>) -> Self {
        Self {
            local,
            remote,
            counters: Counters::default(),
        }
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<CacheService> {
        &self.remote
    }

    /// L1, then L2, then `fetcher`. A fetched value is written to L2 and
    /// then L1 before it is returned; the fetcher's error is returned as is.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        strategy: &CacheStrategy,
        fetcher: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key, strategy).await {
            return Ok(value);
        }

        Counters::bump(&self.counters.fetches);
        let value = fetcher().await?;
        self.set(key, &value, strategy).await;
        Ok(value)
    }

    /// Cached value from either tier, without fetching.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, strategy: &CacheStrategy) -> Option<T> {
        let full_key = strategy.full_key(key);

        if let Some(bytes) = self.local.get(&full_key) {
            match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    Counters::bump(&self.counters.l1_hits);
                    tracing::trace!(key = %full_key, "L1 hit");
                    return Some(value);
                }
                Err(e) => {
                    tracing::error!(key = %full_key, error = %e, "L1 value could not be decoded");
                    self.local.remove(&full_key);
                }
            }
        }

        if let Some((value, bytes)) = self
            .remote
            .get_with_bytes::<T>(key, strategy.key_prefix)
            .await
        {
            Counters::bump(&self.counters.l2_hits);
            self.local
                .insert_with_ttl(full_key, Bytes::from(bytes), strategy.ttl.as_duration());
            return Some(value);
        }

        Counters::bump(&self.counters.misses);
        None
    }

    /// Write through both tiers. Returns whether the L2 write succeeded;
    /// L1 is populated either way.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        strategy: &CacheStrategy,
    ) -> bool {
        let full_key = strategy.full_key(key);
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(key = %full_key, error = %e, "cache value could not be encoded");
                return false;
            }
        };

        Counters::bump(&self.counters.sets);
        let stored = self
            .remote
            .set_bytes(key, bytes.clone(), &strategy.set_options())
            .await;
        self.local
            .insert_with_ttl(full_key, Bytes::from(bytes), strategy.ttl.as_duration());
        stored
    }

    pub async fn delete(&self, key: &str, strategy: &CacheStrategy) -> bool {
        Counters::bump(&self.counters.deletes);
        self.local.remove(&full_key(strategy.key_prefix, key));
        self.remote.delete(key, strategy.key_prefix).await
    }

    /// L2 invalidation by tag. L1 keeps no tag index, so it is emptied.
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> u64 {
        let removed = self.remote.invalidate_by_tags(tags).await;
        self.local.clear();
        let names: Vec<&str> = tags.iter().map(AsRef::as_ref).collect();
        tracing::info!(
            tags = ?names,
            removed,
            "tags invalidated, L1 cleared"
        );
        removed
    }

    /// Empty both tiers.
    pub async fn clear(&self) -> bool {
        self.local.clear();
        self.remote.clear().await
    }

    pub fn metrics(&self) -> TieredMetrics {
        self.counters.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.counters.reset();
        self.remote.reset_metrics();
    }

    pub async fn health(&self) -> CacheHealth {
        let mut health = self.remote.health().await;
        health.l1_entries = Some(self.local.len());
        health
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::ConnectionState;
    use crate::memory::MemoryStore;
    use crate::planes::data::adapter::StoreAdapter;
    use crate::ports::{RemoteStore, TagIndex};
    use serde::Deserialize;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        name: String,
    }

    struct Fixture {
        cache: TieredCache,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(l1_capacity: usize) -> Fixture {
        let clock = Arc::new(ManualClock::new());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let remote = Arc::new(CacheService::new(StoreAdapter::new(store.clone())));
        let local = Arc::new(LocalStore::with_clock(
            l1_capacity,
            Duration::from_secs(60),
            clock.clone(),
        ));
        Fixture {
            cache: TieredCache::new(local, remote),
            store,
            clock,
        }
    }

    async fn fetch_counted(
        cache: &TieredCache,
        key: &str,
        calls: &AtomicUsize,
    ) -> Result<Widget, String> {
        cache
            .get_or_set(key, &CacheStrategy::PRODUCT, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Widget {
                    name: format!("fetched-{key}"),
                })
            })
            .await
    }

    #[tokio::test]
    async fn test_l1_hit_skips_l2_and_fetcher() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);
        fetch_counted(&f.cache, "1", &calls).await.unwrap();

        // Drop L2; L1 still answers.
        f.store.flush().await.unwrap();
        let widget = fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(widget.name, "fetched-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = f.cache.metrics();
        assert_eq!(metrics.l1_hits, 1);
        assert_eq!(metrics.fetches, 1);
    }

    #[tokio::test]
    async fn test_l2_hit_populates_l1() {
        let f = fixture(10);
        f.cache
            .remote()
            .set("7", &Widget { name: "seeded".into() }, &CacheStrategy::PRODUCT.set_options())
            .await;
        assert!(f.cache.local().is_empty());

        let calls = AtomicUsize::new(0);
        let widget = fetch_counted(&f.cache, "7", &calls).await.unwrap();
        assert_eq!(widget.name, "seeded");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(f.cache.local().contains("product:7"));
        assert_eq!(f.cache.metrics().l2_hits, 1);
    }

    #[tokio::test]
    async fn test_fetched_value_lands_in_both_tiers() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);
        fetch_counted(&f.cache, "9", &calls).await.unwrap();

        assert!(f.cache.local().contains("product:9"));
        assert!(f.store.exists("product:9").await.unwrap());
        assert_eq!(f.store.ttl("product:9").await.unwrap(), 7200);
        let members = f.store.members("tag:catalog").await.unwrap();
        assert_eq!(members, vec!["product:9".to_string()]);
    }

    #[tokio::test]
    async fn test_fetcher_error_is_returned_and_nothing_cached() {
        let f = fixture(10);
        let result: Result<Widget, &str> = f
            .cache
            .get_or_set("404", &CacheStrategy::PRODUCT, || async { Err("not found") })
            .await;
        assert_eq!(result, Err("not found"));
        assert!(f.cache.local().is_empty());
        assert!(!f.store.exists("product:404").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_tiers() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);
        fetch_counted(&f.cache, "1", &calls).await.unwrap();

        assert!(f.cache.delete("1", &CacheStrategy::PRODUCT).await);
        assert!(!f.cache.local().contains("product:1"));
        assert!(!f.store.exists("product:1").await.unwrap());

        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_l1_and_tagged_l2() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        f.cache.set("s", &"session", &CacheStrategy::SESSION).await;

        assert_eq!(f.cache.invalidate_by_tags(&["catalog"]).await, 1);
        assert!(f.cache.local().is_empty());
        // Untagged L2 entries survive.
        assert!(f.store.exists("session:s").await.unwrap());

        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_l1_entry_expires_before_l2() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);
        fetch_counted(&f.cache, "1", &calls).await.unwrap();

        f.clock.advance(Duration::from_secs(61));
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.cache.metrics().l2_hits, 1);
    }

    #[tokio::test]
    async fn test_remote_outage_still_serves_fetcher_results() {
        let f = fixture(10);
        f.store.force_state(ConnectionState::Error);
        let calls = AtomicUsize::new(0);

        let widget = fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(widget.name, "fetched-1");
        // L1 still shields repeat reads within its TTL.
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        f.clock.advance(Duration::from_secs(61));
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_undecodable_l2_value_counts_as_miss_in_both_tiers() {
        let f = fixture(10);
        f.store.set("product:1", b"not json", 60).await.unwrap();

        assert_eq!(f.cache.get::<Widget>("1", &CacheStrategy::PRODUCT).await, None);
        let l2 = f.cache.remote().metrics();
        assert_eq!((l2.hits, l2.misses), (0, 1));
        assert_eq!(l2.hit_rate, 0.0);
        let tiered = f.cache.metrics();
        assert_eq!((tiered.l2_hits, tiered.misses), (0, 1));
        assert!(f.cache.local().is_empty());
    }

    #[tokio::test]
    async fn test_health_includes_l1_entries() {
        let f = fixture(10);
        f.cache.set("a", &1, &CacheStrategy::CONFIG).await;
        let health = f.cache.health().await;
        assert_eq!(health.l1_entries, Some(1));
        assert!(health.healthy);
    }

    #[tokio::test]
    async fn test_combined_hit_rate() {
        let f = fixture(10);
        let calls = AtomicUsize::new(0);
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        fetch_counted(&f.cache, "1", &calls).await.unwrap();
        fetch_counted(&f.cache, "2", &calls).await.unwrap();

        let metrics = f.cache.metrics();
        assert_eq!(metrics.misses, 2);
        assert_eq!(metrics.l1_hits, 2);
        assert_eq!(metrics.hit_rate, 0.5);

        f.cache.reset_metrics();
        assert_eq!(f.cache.metrics(), TieredMetrics::default());
    }
}
