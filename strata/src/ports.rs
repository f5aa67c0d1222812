#![deny(clippy::all)]

use crate::domain::{ConnectionState, StoreStats};
use async_trait::async_trait;
use shared::Result;
use std::time::{Duration, Instant};

// Ports are the pluggable extension points for the remote tier and for time

/// Secondary index from a tag to the full keys written under it.
#[async_trait]
pub trait TagIndex: Send + Sync + 'static {
    /// Add `member` to the index at `tag_key` in one atomic step.
    ///
    /// The index expiry only grows: it becomes `ttl_secs` if that is later
    /// than the current expiry, and an index without expiry keeps none.
    /// A `ttl_secs` of 0 removes the expiry.
    async fn add_member(&self, tag_key: &str, member: &str, ttl_secs: u64) -> Result<()>;
    async fn members(&self, tag_key: &str) -> Result<Vec<String>>;
    async fn delete_index(&self, tag_key: &str) -> Result<bool>;
}

/// Port for the shared key/value store behind L2 (e.g., Redis).
///
/// A `ttl_secs` of 0 means "no expiry". `ttl` follows Redis conventions:
/// -2 when the key is absent, -1 when it has no expiry.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    fn connection_state(&self) -> ConnectionState;

    /// The tag index kept alongside this store's data.
    fn tag_index(&self) -> &dyn TagIndex;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()>;
    async fn delete(&self, keys: &[String]) -> Result<u64>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn ttl(&self, key: &str) -> Result<i64>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;
    /// All keys matching a Redis-style glob.
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;
    async fn flush(&self) -> Result<()>;
    /// Round-trip latency of a no-op command.
    async fn ping(&self) -> Result<Duration>;
    async fn stats(&self) -> Result<StoreStats>;
}

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}
