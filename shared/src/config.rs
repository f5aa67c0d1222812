use std::time::Duration;
use tracing::warn;

/// Where and how to reach the remote tier.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: i64,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub health_check_interval: Duration,
}

impl RemoteConfig {
    /// Endpoint for logs. Never contains the credential.
    pub fn redacted_url(&self) -> String {
        if self.url.is_some() {
            return "<STRATA_REDIS_URL>".to_string();
        }
        format!("redis://{}:{}/{}", self.host, self.port, self.database)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: Config::DEFAULT_HOST.to_string(),
            port: Config::DEFAULT_REDIS_PORT,
            password: None,
            database: 0,
            connect_timeout: Duration::from_millis(Config::DEFAULT_CONNECT_TIMEOUT_MS),
            command_timeout: Duration::from_millis(Config::DEFAULT_COMMAND_TIMEOUT_MS),
            health_check_interval: Duration::from_millis(
                Config::DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            ),
        }
    }
}

/// Sizing of the in-process tier.
#[derive(Clone, Copy, Debug)]
pub struct LocalConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            capacity: Config::DEFAULT_L1_CAPACITY,
            ttl: Duration::from_secs(Config::DEFAULT_L1_TTL_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub http_port: u16,
    pub remote: RemoteConfig,
    pub local: LocalConfig,
}

impl Config {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_HTTP_PORT: u16 = 8090;
    const DEFAULT_REDIS_PORT: u16 = 6379;
    const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
    const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;
    const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 5000;
    const DEFAULT_L1_CAPACITY: usize = 1000;
    const DEFAULT_L1_TTL_SECS: u64 = 60;
    /// No strategy keeps entries longer than a day, so L1 never needs to.
    const MAX_L1_TTL_SECS: u64 = 86_400;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str, default: u64| -> u64 {
            match lookup(name) {
                Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|_| {
                    warn!("{} has invalid value '{}', using {}", name, raw, default);
                    default
                }),
                None => default,
            }
        };
        let port = |name: &str, default: u16| -> u16 {
            match lookup(name) {
                Some(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                    warn!("{} has invalid value '{}', using {}", name, raw, default);
                    default
                }),
                None => default,
            }
        };

        let remote = RemoteConfig {
            url: lookup("STRATA_REDIS_URL").filter(|s| !s.trim().is_empty()),
            host: lookup("STRATA_REDIS_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            port: port("STRATA_REDIS_PORT", Self::DEFAULT_REDIS_PORT),
            password: lookup("STRATA_REDIS_PASSWORD").filter(|s| !s.is_empty()),
            database: i64::try_from(number("STRATA_REDIS_DB", 0)).unwrap_or(0),
            connect_timeout: Duration::from_millis(number(
                "STRATA_CONNECT_TIMEOUT_MS",
                Self::DEFAULT_CONNECT_TIMEOUT_MS,
            )),
            command_timeout: Duration::from_millis(number(
                "STRATA_COMMAND_TIMEOUT_MS",
                Self::DEFAULT_COMMAND_TIMEOUT_MS,
            )),
            health_check_interval: Duration::from_millis(number(
                "STRATA_HEALTH_CHECK_INTERVAL_MS",
                Self::DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            )),
        };

        let mut l1_ttl_secs = number("STRATA_L1_TTL_SECS", Self::DEFAULT_L1_TTL_SECS);
        if l1_ttl_secs > Self::MAX_L1_TTL_SECS {
            warn!(
                "STRATA_L1_TTL_SECS {} exceeds {}, capping",
                l1_ttl_secs,
                Self::MAX_L1_TTL_SECS
            );
            l1_ttl_secs = Self::MAX_L1_TTL_SECS;
        }

        let local = LocalConfig {
            capacity: number("STRATA_L1_CAPACITY", Self::DEFAULT_L1_CAPACITY as u64).max(1)
                as usize,
            ttl: Duration::from_secs(l1_ttl_secs),
        };

        Self {
            host: lookup("STRATA_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string()),
            http_port: port("STRATA_HTTP_PORT", Self::DEFAULT_HTTP_PORT),
            remote,
            local,
        }
    }
}
