//! In-process store with the same operation set as the remote tier.
//!
//! Backed by a concurrent map; string values and tag sets share one key
//! space with per-key expiry, like Redis. Useful where no remote store is
//! available and as a fault-injectable stand-in in tests.

use crate::clock::SystemClock;
use crate::domain::{ConnectionState, ConnectionStatus, StoreStats};
use crate::glob::glob_match;
use crate::ports::{Clock, RemoteStore, TagIndex};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use shared::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
}

impl Value {
    fn approx_size(&self) -> usize {
        match self {
            Value::Bytes(bytes) => bytes.len(),
            Value::Set(members) => members.iter().map(String::len).sum(),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value, now: Instant, ttl_secs: u64) -> Self {
        Self {
            value,
            expires_at: expiry(now, ttl_secs),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// `None` for no expiry, and for TTLs too far out to represent.
fn expiry(now: Instant, ttl_secs: u64) -> Option<Instant> {
    if ttl_secs == 0 {
        return None;
    }
    now.checked_add(Duration::from_secs(ttl_secs))
}

fn wrong_type(key: &str) -> Error {
    Error::Internal(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

pub struct MemoryStore {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    status: ConnectionStatus,
    delete_failure: RwLock<Option<String>>,
    write_delay: RwLock<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            status: ConnectionStatus::new(ConnectionState::Connected),
            delete_failure: RwLock::new(None),
            write_delay: RwLock::new(Duration::ZERO),
        }
    }

    /// Put the store into `state`; anything but `Connected` makes every
    /// operation fail with a connection error.
    pub fn force_state(&self, state: ConnectionState) {
        self.status.set(state);
    }

    /// Make deletes of keys matching `pattern` fail until cleared with `None`.
    pub fn inject_delete_failure(&self, pattern: Option<&str>) {
        *self.delete_failure.write() = pattern.map(str::to_string);
    }

    /// Hold every value and tag write for `delay` before applying it.
    pub fn delay_writes(&self, delay: Duration) {
        *self.write_delay.write() = delay;
    }

    async fn pause_write(&self) {
        let delay = *self.write_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn ensure_available(&self) -> Result<()> {
        match self.status.get() {
            ConnectionState::Connected => Ok(()),
            state => Err(Error::Connection(format!("memory store is {state}"))),
        }
    }

    /// Run `f` on the live slot at `key`, dropping it first if it expired.
    fn with_live<R>(&self, key: &str, f: impl FnOnce(&Slot, Instant) -> R) -> Option<R> {
        let now = self.clock.now();
        match self.entries.get(key) {
            None => return None,
            Some(slot) if !slot.is_expired(now) => return Some(f(&*slot, now)),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        None
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("status", &self.status.get())
            .finish()
    }
}

#[async_trait]
impl TagIndex for MemoryStore {
    async fn add_member(&self, tag_key: &str, member: &str, ttl_secs: u64) -> Result<()> {
        self.ensure_available()?;
        self.pause_write().await;
        let now = self.clock.now();
        let fresh = || Slot::new(Value::Set(HashSet::new()), now, ttl_secs);
        // The entry guard holds the shard lock, so the expiry max below
        // cannot interleave with another writer.
        let mut slot = self.entries.entry(tag_key.to_string()).or_insert_with(fresh);
        if slot.is_expired(now) {
            *slot = fresh();
        }
        let Value::Set(members) = &mut slot.value else {
            return Err(wrong_type(tag_key));
        };
        members.insert(member.to_string());
        slot.expires_at = match (slot.expires_at, expiry(now, ttl_secs)) {
            (Some(current), Some(wanted)) => Some(current.max(wanted)),
            _ => None,
        };
        Ok(())
    }

    async fn members(&self, tag_key: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        self.with_live(tag_key, |slot, _| match &slot.value {
            Value::Set(members) => Ok(members.iter().cloned().collect()),
            Value::Bytes(_) => Err(wrong_type(tag_key)),
        })
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn delete_index(&self, tag_key: &str) -> Result<bool> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(tag_key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn connection_state(&self) -> ConnectionState {
        self.status.get()
    }

    fn tag_index(&self) -> &dyn TagIndex {
        self
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_available()?;
        self.with_live(key, |slot, _| match &slot.value {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            Value::Set(_) => Err(wrong_type(key)),
        })
        .transpose()
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        self.ensure_available()?;
        self.pause_write().await;
        let now = self.clock.now();
        self.entries.insert(
            key.to_string(),
            Slot::new(Value::Bytes(value.to_vec()), now, ttl_secs),
        );
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.ensure_available()?;
        if let Some(pattern) = self.delete_failure.read().as_deref() {
            if let Some(key) = keys.iter().find(|k| glob_match(pattern, k)) {
                return Err(Error::Internal(format!("delete of '{key}' rejected")));
            }
        }

        let now = self.clock.now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, slot)| !slot.is_expired(now))
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.with_live(key, |_, _| ()).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.ensure_available()?;
        Ok(self
            .with_live(key, |slot, now| match slot.expires_at {
                None => -1,
                Some(at) => ((at.saturating_duration_since(now).as_millis() + 500) / 1000) as i64,
            })
            .unwrap_or(-2))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        self.ensure_available()?;
        if self.with_live(key, |_, _| ()).is_none() {
            return Ok(false);
        }
        if ttl_secs == 0 {
            return Ok(self.entries.remove(key).is_some());
        }
        let now = self.clock.now();
        Ok(match self.entries.get_mut(key) {
            Some(mut slot) => {
                slot.expires_at = expiry(now, ttl_secs);
                true
            }
            None => false,
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::Bytes(b"0".to_vec()), now, 0));
        if slot.is_expired(now) {
            *slot = Slot::new(Value::Bytes(b"0".to_vec()), now, 0);
        }
        let Value::Bytes(bytes) = &mut slot.value else {
            return Err(wrong_type(key));
        };
        let current: i64 = std::str::from_utf8(bytes.as_slice())
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Internal(format!("value at '{key}' is not an integer")))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| Error::Internal(format!("increment of '{key}' would overflow")))?;
        *bytes = next.to_string().into_bytes();
        Ok(next)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn flush(&self) -> Result<()> {
        self.ensure_available()?;
        self.entries.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        self.ensure_available()?;
        Ok(Duration::ZERO)
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.ensure_available()?;
        let now = self.clock.now();
        let (keys, bytes) = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .fold((0u64, 0u64), |(keys, bytes), entry| {
                let size = entry.key().len() + entry.value().value.approx_size();
                (keys + 1, bytes + size as u64)
            });
        Ok(StoreStats {
            total_keys: keys,
            memory_bytes: Some(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_get_and_expiry() {
        let (store, clock) = store_with_clock();
        store.set("k", b"v", 1).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.ttl("k").await.unwrap(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), -2);
    }

    #[tokio::test]
    async fn test_ttl_without_expiry() {
        let (store, _) = store_with_clock();
        store.set("forever", b"v", 0).await.unwrap();
        assert_eq!(store.ttl("forever").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_expire_extends_and_zero_deletes() {
        let (store, clock) = store_with_clock();
        store.set("k", b"v", 1).await.unwrap();
        assert!(store.expire("k", 10).await.unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(store.exists("k").await.unwrap());

        assert!(store.expire("k", 0).await.unwrap());
        assert!(!store.exists("k").await.unwrap());
        assert!(!store.expire("missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_by_counts_from_zero() {
        let (store, _) = store_with_clock();
        assert_eq!(store.incr_by("counter", 5).await.unwrap(), 5);
        assert_eq!(store.incr_by("counter", -2).await.unwrap(), 3);

        store.set("text", b"abc", 0).await.unwrap();
        assert!(store.incr_by("text", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_tag_index_members_and_delete() {
        let (store, _) = store_with_clock();
        store.add_member("tag:product", "product:1", 60).await.unwrap();
        store.add_member("tag:product", "product:2", 60).await.unwrap();
        store.add_member("tag:product", "product:1", 60).await.unwrap();

        let mut members = store.members("tag:product").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["product:1", "product:2"]);

        assert!(store.delete_index("tag:product").await.unwrap());
        assert!(store.members("tag:product").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tag_index_expiry_never_shrinks() {
        let (store, _) = store_with_clock();
        store.add_member("tag:catalog", "product:1", 7500).await.unwrap();
        store.add_member("tag:catalog", "search:q", 1200).await.unwrap();
        assert_eq!(store.ttl("tag:catalog").await.unwrap(), 7500);

        store.add_member("tag:catalog", "config:1", 0).await.unwrap();
        assert_eq!(store.ttl("tag:catalog").await.unwrap(), -1);
        store.add_member("tag:catalog", "search:r", 1200).await.unwrap();
        assert_eq!(store.ttl("tag:catalog").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_means_no_expiry() {
        let (store, _) = store_with_clock();
        store.set("k", b"v", u64::MAX).await.unwrap();
        assert_eq!(store.ttl("k").await.unwrap(), -1);

        store.set("short", b"v", 10).await.unwrap();
        assert!(store.expire("short", u64::MAX).await.unwrap());
        assert_eq!(store.ttl("short").await.unwrap(), -1);
        store.add_member("tag:t", "k", u64::MAX).await.unwrap();
        assert_eq!(store.ttl("tag:t").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let (store, _) = store_with_clock();
        store.add_member("tag:x", "a", 60).await.unwrap();
        assert!(store.get("tag:x").await.is_err());

        store.set("plain", b"v", 0).await.unwrap();
        assert!(store.add_member("plain", "a", 60).await.is_err());
    }

    #[tokio::test]
    async fn test_scan_and_delete_count_only_live_keys() {
        let (store, clock) = store_with_clock();
        store.set("product:1", b"a", 100).await.unwrap();
        store.set("product:2", b"b", 1).await.unwrap();
        store.set("vendor:1", b"c", 100).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let mut keys = store.scan("product:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["product:1"]);

        let removed = store
            .delete(&["product:1".to_string(), "product:2".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_forced_state_fails_operations() {
        let store = MemoryStore::new();
        store.force_state(ConnectionState::Error);
        assert_eq!(store.connection_state(), ConnectionState::Error);
        assert!(matches!(store.get("k").await, Err(Error::Connection(_))));
        assert!(store.ping().await.is_err());

        store.force_state(ConnectionState::Connected);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_delete_failure() {
        let store = MemoryStore::new();
        store.set("a:1", b"x", 0).await.unwrap();
        store.inject_delete_failure(Some("a:*"));
        assert!(store.delete(&["a:1".to_string()]).await.is_err());

        store.inject_delete_failure(None);
        assert_eq!(store.delete(&["a:1".to_string()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = MemoryStore::new();
        store.set("k1", b"1234", 0).await.unwrap();
        store.add_member("tag:t", "k1", 0).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.memory_bytes, Some((2 + 4 + 5 + 2) as u64));
    }
}
