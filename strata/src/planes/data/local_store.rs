use crate::clock::SystemClock;
use crate::ports::Clock;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
struct LocalEntry {
    value: Bytes,
    /// `None` when the TTL runs past what `Instant` can represent.
    expires_at: Option<Instant>,
    seq: u64,
}

impl LocalEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now <= at)
    }
}

/// Entries plus their insertion order. Removing a key leaves its order
/// record behind; a record whose `seq` no longer matches the entry is
/// stale and skipped on eviction.
#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<String, LocalEntry>,
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

impl Slots {
    fn is_current(&self, key: &str, seq: u64) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.seq == seq)
    }

    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((key, seq)) = self.order.pop_front() {
            if self.is_current(&key, seq) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn push(&mut self, key: String, value: Bytes, expires_at: Option<Instant>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((key.clone(), seq));
        self.entries.insert(
            key,
            LocalEntry {
                value,
                expires_at,
                seq,
            },
        );
    }

    fn remove(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        self.compact();
        removed
    }

    /// Drop stale order records once they outnumber live entries.
    fn compact(&mut self) {
        if self.order.len() <= 2 * self.entries.len() + 16 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).is_some_and(|entry| entry.seq == *seq));
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// Bounded in-process L1 with its own short TTL.
///
/// Eviction is first-in-first-out: when full, the entry inserted earliest
/// among those present is dropped. Reads do not change eviction order, and
/// overwriting a present key keeps its original position. Expired entries
/// are removed lazily on read or by [`LocalStore::purge_expired`].
pub struct LocalStore {
    slots: Mutex<Slots>,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl LocalStore {
    pub const DEFAULT_CAPACITY: usize = 1000;
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            capacity: capacity.max(1),
            ttl,
            clock,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        match slots.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert with the store's own TTL.
    pub fn insert(&self, key: impl Into<String>, value: Bytes) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    /// Insert with `min(ttl, store TTL)`, so L1 never outlives the caller's
    /// intended lifetime.
    pub fn insert_with_ttl(&self, key: impl Into<String>, value: Bytes, ttl: Duration) {
        let key = key.into();
        let expires_at = self.clock.now().checked_add(ttl.min(self.ttl));
        let mut slots = self.slots.lock();

        if let Some(entry) = slots.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        while slots.entries.len() >= self.capacity {
            match slots.evict_oldest() {
                Some(evicted) => tracing::trace!(key = %evicted, "L1 eviction"),
                None => break,
            }
        }
        slots.push(key, value, expires_at);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.slots.lock().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Number of entries held, expired or not.
    pub fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.slots.lock();
        let before = slots.entries.len();
        slots.entries.retain(|_, entry| entry.is_live(now));
        slots.compact();
        before - slots.entries.len()
    }

    /// Background sweep every `interval`. Stops once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "L1 sweep");
                }
            }
        })
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY, Self::DEFAULT_TTL)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("entries", &self.len())
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .finish()
    }
}
