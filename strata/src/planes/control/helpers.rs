//! Category-bound shortcuts over [`TieredCache`]. They add no state of their
//! own; each one fixes the strategy and the key.

use crate::planes::control::strategy::CacheStrategy;
use crate::planes::data::tiered::TieredCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

pub async fn cache_user<T, E, F, Fut>(cache: &TieredCache, id: &str, fetcher: F) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    cache.get_or_set(id, &CacheStrategy::USER, fetcher).await
}

pub async fn cache_product<T, E, F, Fut>(cache: &TieredCache, id: &str, fetcher: F) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    cache.get_or_set(id, &CacheStrategy::PRODUCT, fetcher).await
}

pub async fn cache_vendor<T, E, F, Fut>(cache: &TieredCache, id: &str, fetcher: F) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    cache.get_or_set(id, &CacheStrategy::VENDOR, fetcher).await
}

/// Search results are keyed by the query text.
pub async fn cache_search<T, E, F, Fut>(cache: &TieredCache, query: &str, fetcher: F) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    cache
        .get_or_set(&search_key(query), &CacheStrategy::SEARCH, fetcher)
        .await
}

pub async fn invalidate_user(cache: &TieredCache, id: &str) -> bool {
    cache.delete(id, &CacheStrategy::USER).await
}

pub async fn invalidate_product(cache: &TieredCache, id: &str) -> bool {
    cache.delete(id, &CacheStrategy::PRODUCT).await
}

pub async fn invalidate_vendor(cache: &TieredCache, id: &str) -> bool {
    cache.delete(id, &CacheStrategy::VENDOR).await
}

/// Drop every product listing and search result at once.
pub async fn invalidate_catalog(cache: &TieredCache) -> u64 {
    cache.invalidate_by_tags(&["catalog", "search"]).await
}

fn search_key(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Wrap `fetch` so every call goes through the cache under `strategy`,
/// keyed by `key_fn(&arg)`.
pub fn with_cache<K, F>(
    cache: Arc<TieredCache>,
    strategy: CacheStrategy,
    key_fn: K,
    fetch: F,
) -> WithCache<K, F> {
    WithCache {
        cache,
        strategy,
        key_fn,
        fetch,
    }
}

/// A fetch function with its cache boundary attached. See [`with_cache`].
pub struct WithCache<K, F> {
    cache: Arc<TieredCache>,
    strategy: CacheStrategy,
    key_fn: K,
    fetch: F,
}

impl<K, F> WithCache<K, F> {
    pub fn strategy(&self) -> &CacheStrategy {
        &self.strategy
    }

    pub async fn call<A, T, E, Fut>(&self, arg: A) -> Result<T, E>
    where
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
    {
        let key = (self.key_fn)(&arg);
        self.cache
            .get_or_set(&key, &self.strategy, || (self.fetch)(arg))
            .await
    }
}
