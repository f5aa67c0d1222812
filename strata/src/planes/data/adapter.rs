use crate::domain::{ConnectionState, StoreStats};
use crate::ports::{RemoteStore, TagIndex};
use async_trait::async_trait;
use shared::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Stand-in used while the remote store is unreachable: every read misses,
/// every write is accepted and discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;

#[async_trait]
impl TagIndex for NullStore {
    async fn add_member(&self, _tag_key: &str, _member: &str, _ttl_secs: u64) -> Result<()> {
        Ok(())
    }

    async fn members(&self, _tag_key: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_index(&self, _tag_key: &str) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl RemoteStore for NullStore {
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }

    fn tag_index(&self) -> &dyn TagIndex {
        self
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_secs: u64) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        Ok(u64::from(!keys.is_empty()))
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn ttl(&self, _key: &str) -> Result<i64> {
        Ok(-1)
    }

    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<bool> {
        Ok(true)
    }

    async fn incr_by(&self, _key: &str, delta: i64) -> Result<i64> {
        Ok(delta)
    }

    async fn scan(&self, _pattern: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        Ok(Duration::ZERO)
    }

    async fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats::default())
    }
}

/// The store an L2 call goes to, picked per call from the connection state.
#[derive(Clone)]
pub enum Backend {
    Remote(Arc<dyn RemoteStore>),
    Null(NullStore),
}

impl Backend {
    pub fn store(&self) -> &dyn RemoteStore {
        match self {
            Backend::Remote(store) => store.as_ref(),
            Backend::Null(store) => store as &dyn RemoteStore,
        }
    }

    /// Owned handle, for work that outlives the caller's borrow.
    pub fn into_store(self) -> Arc<dyn RemoteStore> {
        match self {
            Backend::Remote(store) => store,
            Backend::Null(store) => Arc::new(store) as Arc<dyn RemoteStore>,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Backend::Null(_))
    }

    pub fn mode(&self) -> &'static str {
        match self {
            Backend::Remote(_) => "remote",
            Backend::Null(_) => "null",
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mode())
    }
}

/// Routes L2 calls to the remote store while it is `Connected` and to the
/// [`NullStore`] otherwise. Transitions are logged once, not per call.
pub struct StoreAdapter {
    remote: Option<Arc<dyn RemoteStore>>,
    degraded: AtomicBool,
}

impl StoreAdapter {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote: Some(remote),
            degraded: AtomicBool::new(false),
        }
    }

    /// Adapter for a remote store that could not be constructed.
    pub fn disconnected() -> Self {
        Self {
            remote: None,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.remote
            .as_ref()
            .map_or(ConnectionState::Disconnected, |remote| remote.connection_state())
    }

    /// The remote store itself, regardless of state. Used for probing.
    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    pub fn backend(&self) -> Backend {
        let state = self.state();
        let connected = state.is_connected();
        let was_degraded = self.degraded.swap(!connected, Ordering::AcqRel);

        if !connected && !was_degraded {
            tracing::warn!(
                state = %state,
                "Remote cache store unavailable, falling back to null store"
            );
        } else if connected && was_degraded {
            tracing::info!("Remote cache store connected, leaving null store");
        }

        match &self.remote {
            Some(remote) if connected => Backend::Remote(Arc::clone(remote)),
            _ => Backend::Null(NullStore),
        }
    }
}

impl std::fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("state", &self.state())
            .field("has_remote", &self.remote.is_some())
            .finish()
    }
}
