//! Remote tier implementations for the strata cache.

pub mod redis_store;

pub use redis_store::RedisStore;

use shared::config::RemoteConfig;
use std::sync::Arc;
use strata::StoreAdapter;

/// Build the L2 adapter for `config` and start its connection monitor.
///
/// Never fails: a bad URL yields an adapter with no remote store, and an
/// unreachable server yields one that serves from the null store until the
/// monitor gets through.
pub async fn connect_remote(config: &RemoteConfig) -> StoreAdapter {
    let store = match RedisStore::new(config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "Remote cache store misconfigured, running without L2");
            return StoreAdapter::disconnected();
        }
    };

    if let Err(e) = store.connect().await {
        tracing::warn!(
            endpoint = %config.redacted_url(),
            error = %e,
            "Remote cache store unreachable at startup, will keep retrying"
        );
    }

    // Detached: the monitor holds only a weak handle and exits with the store.
    store.spawn_monitor(config.health_check_interval);
    StoreAdapter::new(store)
}
