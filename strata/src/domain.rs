use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::TtlSecs;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the connection to the remote store.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Error = 3,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free holder for a [`ConnectionState`], written by the store's
/// lifecycle and read on every cache call.
#[derive(Debug)]
pub struct ConnectionStatus(AtomicU8);

impl ConnectionStatus {
    pub fn new(initial: ConnectionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from(self.0.load(Ordering::Acquire))
    }

    /// Store a new state and return the previous one.
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from(self.0.swap(state as u8, Ordering::AcqRel))
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected)
    }
}

/// Per-write parameters for the remote tier.
#[derive(Clone, Debug)]
pub struct SetOptions {
    pub ttl: TtlSecs,
    pub prefix: String,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn new(ttl: TtlSecs, prefix: impl Into<String>) -> Self {
        Self {
            ttl,
            prefix: prefix.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Point-in-time copy of the hit/miss counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
}

impl MetricsSnapshot {
    pub fn new(hits: u64, misses: u64, sets: u64, deletes: u64) -> Self {
        Self {
            hits,
            misses,
            sets,
            deletes,
            hit_rate: hit_rate(hits, misses),
        }
    }
}

/// `hits / (hits + misses)`, or 0 before any lookup.
pub fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Size information reported by a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total_keys: u64,
    pub memory_bytes: Option<u64>,
}

/// Read-only status document for health and ops tooling.
#[derive(Clone, Debug, Serialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub mode: &'static str,
    pub connection_state: ConnectionState,
    pub total_keys: u64,
    pub memory_bytes: Option<u64>,
    pub hit_rate: f64,
    pub uptime_secs: u64,
    pub latency_ms: Option<f64>,
    pub l1_entries: Option<usize>,
    pub started_at: DateTime<Utc>,
}
