//! Two-tier cache core: an in-process L1 in front of a shared remote L2.
//!
//! ```text
//! get → L1 (LocalStore) → L2 (CacheService → RemoteStore | NullStore) → fetcher
//! ```
//!
//! Cache-layer failures never reach the caller. When the remote store is not
//! `Connected`, every L2 call is routed to the [`NullStore`] and behaves like
//! a miss.

pub mod clock;
pub mod domain;
pub mod glob;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod planes;
pub mod ports;

pub use clock::{ManualClock, SystemClock};
pub use domain::{CacheHealth, ConnectionState, ConnectionStatus, MetricsSnapshot, SetOptions};
pub use memory::MemoryStore;
pub use planes::control::strategy::{CacheStrategy, StrategyRegistry};
pub use planes::data::adapter::{Backend, NullStore, StoreAdapter};
pub use planes::data::cache_service::CacheService;
pub use planes::data::local_store::LocalStore;
pub use planes::data::tiered::{TieredCache, TieredMetrics};
pub use ports::{Clock, RemoteStore, TagIndex};
