use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{
    AsyncCommands, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo,
    RedisError, RedisResult,
};
use shared::config::RemoteConfig;
use shared::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata::domain::StoreStats;
use strata::{ConnectionState, ConnectionStatus, RemoteStore, TagIndex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const SCAN_COUNT: usize = 100;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

// SADD plus an expiry that only grows. TTL is read before SADD so a brand
// new index (-2) is told apart from one without expiry (-1).
const ADD_MEMBER_SCRIPT: &str = r"
local current = redis.call('TTL', KEYS[1])
redis.call('SADD', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl == 0 then
    redis.call('PERSIST', KEYS[1])
elseif current ~= -1 and current < ttl then
    redis.call('EXPIRE', KEYS[1], ttl)
end
return 1
";

/// Redis-backed remote tier.
///
/// Holds one auto-reconnecting multiplexed connection shared by all callers.
/// Every command is bounded by the command timeout; a timeout or a transport
/// failure moves the store to `Error` until a probe succeeds again.
pub struct RedisStore {
    client: redis::Client,
    add_member_script: redis::Script,
    conn: RwLock<Option<ConnectionManager>>,
    status: ConnectionStatus,
    connect_timeout: Duration,
    command_timeout: Duration,
    endpoint: String,
}

impl RedisStore {
    /// Build the client without touching the network. Fails only on a
    /// malformed connection URL.
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = redis::Client::open(connection_info(config)?)
            .map_err(|e| Error::Connection(format!("invalid redis url: {e}")))?;
        Ok(Self {
            client,
            add_member_script: redis::Script::new(ADD_MEMBER_SCRIPT),
            conn: RwLock::new(None),
            status: ConnectionStatus::default(),
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            endpoint: config.redacted_url(),
        })
    }

    /// Open the shared connection and verify it with a PING.
    pub async fn connect(&self) -> Result<()> {
        self.transition(ConnectionState::Connecting);

        let manager = match timeout(
            self.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        {
            Ok(Ok(manager)) => manager,
            Ok(Err(e)) => {
                self.transition(ConnectionState::Error);
                return Err(Error::Connection(e.to_string()));
            }
            Err(_) => {
                self.transition(ConnectionState::Error);
                return Err(Error::Timeout(self.connect_timeout));
            }
        };
        *self.conn.write() = Some(manager);

        match self.ping().await {
            Ok(rtt) => {
                self.transition(ConnectionState::Connected);
                info!(endpoint = %self.endpoint, rtt_ms = rtt.as_secs_f64() * 1000.0, "Redis connected");
                Ok(())
            }
            Err(e) => {
                self.transition(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Background probe every `interval`, backing off up to a minute while
    /// the store is failing. Stops once the store is dropped.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut delay = interval;
            loop {
                tokio::time::sleep(delay).await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                delay = if store.probe().await {
                    interval
                } else {
                    delay.saturating_mul(2).min(MAX_BACKOFF).max(interval)
                };
            }
        })
    }

    async fn probe(&self) -> bool {
        if self.conn.read().is_none() {
            return match self.connect().await {
                Ok(()) => true,
                Err(e) => {
                    debug!(endpoint = %self.endpoint, error = %e, "Redis connect attempt failed");
                    false
                }
            };
        }

        match self.ping().await {
            Ok(_) => {
                self.transition(ConnectionState::Connected);
                true
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Redis probe failed");
                self.transition(ConnectionState::Error);
                false
            }
        }
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self.status.set(state);
        if previous == state {
            return;
        }
        match state {
            ConnectionState::Error => {
                warn!(endpoint = %self.endpoint, from = %previous, "Redis connection lost")
            }
            ConnectionState::Connected if previous == ConnectionState::Error => {
                info!(endpoint = %self.endpoint, "Redis connection restored")
            }
            _ => debug!(endpoint = %self.endpoint, from = %previous, to = %state, "Redis state change"),
        }
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn
            .read()
            .clone()
            .ok_or_else(|| Error::Connection(format!("not connected to {}", self.endpoint)))
    }

    /// Await a command under the command timeout.
    async fn bounded<T>(&self, command: impl Future<Output = RedisResult<T>>) -> Result<T> {
        match timeout(self.command_timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if is_transport_failure(&e) {
                    self.transition(ConnectionState::Error);
                    Err(Error::Connection(e.to_string()))
                } else {
                    Err(Error::Internal(e.to_string()))
                }
            }
            Err(_) => {
                self.transition(ConnectionState::Error);
                Err(Error::Timeout(self.command_timeout))
            }
        }
    }
}

/// Connection parameters for `config`. Credentials are passed as fields,
/// never spliced into a URL, so they need no escaping.
fn connection_info(config: &RemoteConfig) -> Result<ConnectionInfo> {
    if let Some(url) = &config.url {
        return url
            .as_str()
            .into_connection_info()
            .map_err(|e| Error::Connection(format!("invalid redis url: {e}")));
    }
    Ok(ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.database,
            password: config.password.clone(),
            ..RedisConnectionInfo::default()
        },
    })
}

fn is_transport_failure(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

fn parse_used_memory(info: &str) -> Option<u64> {
    info.lines()
        .find_map(|line| line.strip_prefix("used_memory:"))
        .and_then(|value| value.trim().parse().ok())
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .field("state", &self.status.get())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

#[async_trait]
impl TagIndex for RedisStore {
    async fn add_member(&self, tag_key: &str, member: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection()?;
        let mut invocation = self.add_member_script.key(tag_key);
        invocation.arg(member).arg(ttl_secs);
        let _: i64 = self.bounded(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn members(&self, tag_key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let members: Vec<String> = self.bounded(conn.smembers(tag_key)).await?;
        Ok(members)
    }

    async fn delete_index(&self, tag_key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let removed: u64 = self.bounded(conn.del(tag_key)).await?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    fn connection_state(&self) -> ConnectionState {
        self.status.get()
    }

    fn tag_index(&self) -> &dyn TagIndex {
        self
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = self.bounded(conn.get(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<()> {
        let mut conn = self.connection()?;
        if ttl_secs > 0 {
            let _: () = self.bounded(conn.set_ex(key, value, ttl_secs)).await?;
        } else {
            let _: () = self.bounded(conn.set(key, value)).await?;
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        let removed: u64 = self.bounded(conn.del(keys)).await?;
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection()?;
        let exists: bool = self.bounded(conn.exists(key)).await?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection()?;
        let ttl: i64 = self.bounded(conn.ttl(key)).await?;
        Ok(ttl)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.connection()?;
        let seconds = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        let updated: bool = self.bounded(conn.expire(key, seconds)).await?;
        Ok(updated)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.connection()?;
        let value: i64 = self.bounded(conn.incr(key, delta)).await?;
        Ok(value)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection()?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = self
            .bounded(redis::cmd("FLUSHDB").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<Duration> {
        let mut conn = self.connection()?;
        let started = Instant::now();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(started.elapsed())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut conn = self.connection()?;
        let info: String = self
            .bounded(redis::cmd("INFO").arg("memory").query_async(&mut conn))
            .await?;
        let total_keys: u64 = self
            .bounded(redis::cmd("DBSIZE").query_async(&mut conn))
            .await?;
        Ok(StoreStats {
            total_keys,
            memory_bytes: parse_used_memory(&info),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::{CacheService, StoreAdapter};

    fn config_from_env() -> Option<RemoteConfig> {
        let url = std::env::var("STRATA_TEST_REDIS_URL").ok()?;
        Some(RemoteConfig {
            url: Some(url),
            command_timeout: Duration::from_secs(1),
            ..RemoteConfig::default()
        })
    }

    #[test]
    fn test_parse_used_memory() {
        let info = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\n";
        assert_eq!(parse_used_memory(info), Some(1_048_576));
        assert_eq!(parse_used_memory("# Memory\r\n"), None);
    }

    #[test]
    fn test_bad_url_is_rejected() {
        let config = RemoteConfig {
            url: Some("not-a-url".to_string()),
            ..RemoteConfig::default()
        };
        assert!(RedisStore::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_commands_fail_before_connect() {
        let store = RedisStore::new(&RemoteConfig::default()).unwrap();
        assert_eq!(store.connection_state(), ConnectionState::Disconnected);
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_unreachable_server_ends_in_error_state() {
        let config = RemoteConfig {
            // Reserved TEST-NET address; nothing listens there.
            host: "192.0.2.1".to_string(),
            connect_timeout: Duration::from_millis(100),
            ..RemoteConfig::default()
        };
        let store = RedisStore::new(&config).unwrap();
        assert!(store.connect().await.is_err());
        assert_eq!(store.connection_state(), ConnectionState::Error);
    }

    #[test]
    fn test_credentials_are_not_spliced_into_a_url() {
        let config = RemoteConfig {
            host: "cache.internal".to_string(),
            password: Some("p@ss/w:rd".to_string()),
            database: 3,
            ..RemoteConfig::default()
        };
        let info = connection_info(&config).unwrap();
        assert!(matches!(
            &info.addr,
            ConnectionAddr::Tcp(host, 6379) if host == "cache.internal"
        ));
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w:rd"));
        assert_eq!(info.redis.db, 3);
    }

    #[test]
    fn test_explicit_url_wins() {
        let config = RemoteConfig {
            url: Some("redis://other:7000/1".to_string()),
            host: "ignored".to_string(),
            ..RemoteConfig::default()
        };
        let info = connection_info(&config).unwrap();
        assert!(matches!(&info.addr, ConnectionAddr::Tcp(host, 7000) if host == "other"));
        assert_eq!(info.redis.db, 1);
    }

    #[tokio::test]
    async fn test_command_timeout_marks_store_failed() {
        let config = RemoteConfig {
            command_timeout: Duration::from_millis(20),
            ..RemoteConfig::default()
        };
        let store = RedisStore::new(&config).unwrap();
        store.transition(ConnectionState::Connected);

        let err = store
            .bounded(std::future::pending::<RedisResult<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(store.connection_state(), ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_silent_server_times_out_and_cache_misses() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = RemoteConfig {
            port,
            connect_timeout: Duration::from_millis(200),
            command_timeout: Duration::from_millis(100),
            ..RemoteConfig::default()
        };
        let store = Arc::new(RedisStore::new(&config).unwrap());
        let err = store.connect().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(store.connection_state(), ConnectionState::Error);

        let cache = CacheService::new(StoreAdapter::new(store.clone()));
        assert_eq!(cache.get::<String>("k", "test").await, None);
        assert_eq!(cache.metrics().misses, 1);
        server.abort();
    }

    #[tokio::test]
    #[ignore = "needs STRATA_TEST_REDIS_URL"]
    async fn test_tag_index_expiry_only_grows_against_redis() {
        let Some(config) = config_from_env() else {
            return;
        };
        let store = RedisStore::new(&config).unwrap();
        store.connect().await.unwrap();

        let tag = "tag:strata-test-grow";
        store.delete_index(tag).await.unwrap();
        store.add_member(tag, "strata-test:long", 7500).await.unwrap();
        store.add_member(tag, "strata-test:short", 1200).await.unwrap();
        assert!(store.ttl(tag).await.unwrap() > 7000);

        store.add_member(tag, "strata-test:forever", 0).await.unwrap();
        store.add_member(tag, "strata-test:short", 1200).await.unwrap();
        assert_eq!(store.ttl(tag).await.unwrap(), -1);
        store.delete_index(tag).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs STRATA_TEST_REDIS_URL"]
    async fn test_round_trip_against_redis() {
        let Some(config) = config_from_env() else {
            return;
        };
        let store = RedisStore::new(&config).unwrap();
        store.connect().await.unwrap();
        assert!(store.connection_state().is_connected());

        store.set("strata-test:k", b"v", 60).await.unwrap();
        assert_eq!(store.get("strata-test:k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.ttl("strata-test:k").await.unwrap() > 0);

        store
            .add_member("tag:strata-test", "strata-test:k", 360)
            .await
            .unwrap();
        assert_eq!(
            store.members("tag:strata-test").await.unwrap(),
            vec!["strata-test:k".to_string()]
        );

        let keys = store.scan("strata-test:*").await.unwrap();
        assert_eq!(keys, vec!["strata-test:k".to_string()]);
        assert_eq!(store.delete(&keys).await.unwrap(), 1);
        assert!(store.delete_index("tag:strata-test").await.unwrap());
        assert!(store.stats().await.unwrap().memory_bytes.is_some());
    }

    #[tokio::test]
    #[ignore = "needs STRATA_TEST_REDIS_URL"]
    async fn test_counters_against_redis() {
        let Some(config) = config_from_env() else {
            return;
        };
        let store = RedisStore::new(&config).unwrap();
        store.connect().await.unwrap();

        let key = "strata-test:counter".to_string();
        store.delete(std::slice::from_ref(&key)).await.unwrap();
        assert_eq!(store.incr_by(&key, 5).await.unwrap(), 5);
        assert_eq!(store.incr_by(&key, -2).await.unwrap(), 3);
        assert!(store.expire(&key, 30).await.unwrap());
        store.delete(std::slice::from_ref(&key)).await.unwrap();
    }
}
