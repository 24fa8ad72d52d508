use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Tier definitions, configured as either an inline JSON blob (handy for
/// tests and small deployments) or a path to a file read once at startup.
#[derive(Debug, Clone)]
pub enum TierConfigSource {
    Inline(serde_json::Value),
    Path(PathBuf),
}

/// The full configuration surface (§6.1). Every field but
/// `service_name`/`environment`/`redis_url` has a default; `from_env`
/// reads `std::env::var` the same way the teacher's own integration tests
/// already do for `REDIS_URL`.
#[derive(Debug, Clone)]
pub struct Config {
    pub service_name: String,
    pub environment: String,
    pub root_prefix: String,
    pub redis_url: String,
    pub redis_password: Option<String>,
    pub redis_tls: bool,
    pub worker_count: u32,
    pub batch_size: u32,
    pub block_ms: u64,
    pub visibility_timeout_ms: u64,
    pub max_deliveries: u32,
    pub retry_backoff_ms: u64,
    pub pseudo_sync_default_timeout_ms: u64,
    pub tier_config: Option<TierConfigSource>,
}

impl Config {
    /// Reads the surface from the process environment. `SERVICE_NAME`,
    /// `ENVIRONMENT`, and `REDIS_URL` are mandatory; everything else falls
    /// back to its documented default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_name = require_env("SERVICE_NAME")?;
        let environment = require_env("ENVIRONMENT")?;
        let redis_url = require_env("REDIS_URL")?;

        let tier_config = match (std::env::var("TIER_CONFIG_PATH").ok(), std::env::var("TIER_CONFIG_INLINE").ok()) {
            (Some(path), _) => Some(TierConfigSource::Path(PathBuf::from(path))),
            (None, Some(inline)) => {
                let value = serde_json::from_str(&inline)
                    .map_err(|e| ConfigError::Invalid { field: "TIER_CONFIG_INLINE", reason: e.to_string() })?;
                Some(TierConfigSource::Inline(value))
            }
            (None, None) => None,
        };

        Ok(Self {
            service_name,
            environment,
            root_prefix: env_or("ROOT_PREFIX", "dax"),
            redis_url,
            redis_password: std::env::var("REDIS_PASSWORD").ok(),
            redis_tls: env_or("REDIS_TLS", "false").parse().unwrap_or(false),
            worker_count: parse_env_or("WORKER_COUNT", 1)?,
            batch_size: parse_env_or("BATCH_SIZE", 10)?,
            block_ms: parse_env_or("BLOCK_MS", 2000)?,
            visibility_timeout_ms: parse_env_or("VISIBILITY_TIMEOUT_MS", 30_000)?,
            max_deliveries: parse_env_or("MAX_DELIVERIES", 5)?,
            retry_backoff_ms: parse_env_or("RETRY_BACKOFF_MS", 1000)?,
            pseudo_sync_default_timeout_ms: parse_env_or("PSEUDO_SYNC_DEFAULT_TIMEOUT_MS", 5000)?,
            tier_config,
        })
    }

    /// `redis_url` with TLS scheme and credentials folded in, so
    /// `dax-broker-redis`/`dax-state-redis` only ever need a single
    /// connection string.
    pub fn redis_connection_url(&self) -> String {
        let mut url = self.redis_url.clone();
        if self.redis_tls && url.starts_with("redis://") {
            url = format!("rediss://{}", &url["redis://".len()..]);
        }
        if let Some(password) = &self.redis_password
            && !url.contains('@')
        {
            let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
            url = format!("{}:{}@{}", &url[..scheme_end], password, &url[scheme_end..]);
        }
        url
    }

    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn pseudo_sync_default_timeout(&self) -> Duration {
        Duration::from_millis(self.pseudo_sync_default_timeout_ms)
    }
}

fn require_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingRequired(key))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid { field: key, reason: e.to_string() }),
        Err(_) => Ok(default),
    }
}
