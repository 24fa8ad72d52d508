use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dax_state::{StateError, StateStore, Version};

use crate::config::RedisStateConfig;
use crate::error::map_redis_err;

/// `store_if_unchanged` against this sentinel succeeds only if the key
/// does not yet exist, letting callers do a create-if-absent.
pub const ABSENT_VERSION: &str = "0";

/// Entities are stored as a two-field hash (`value`, `version`) rather
/// than a bare string so `store_if_unchanged` can compare a cheap integer
/// instead of the full value, in one round trip, without `WATCH`/`MULTI`.
const CAS_SCRIPT: &str = r#"
local cur = redis.call('HGET', KEYS[1], 'version')
if cur == false then cur = '0' end
if cur == ARGV[1] then
    local v = redis.call('HINCRBY', KEYS[1], 'version', 1)
    redis.call('HSET', KEYS[1], 'value', ARGV[2])
    if ARGV[3] ~= '' then
        redis.call('EXPIRE', KEYS[1], ARGV[3])
    end
    return v
else
    return -1
end
"#;

const STORE_SCRIPT: &str = r#"
redis.call('HSET', KEYS[1], 'value', ARGV[1])
local v = redis.call('HINCRBY', KEYS[1], 'version', 1)
if ARGV[2] ~= '' then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return v
"#;

pub struct RedisStateStore {
    conn: redis::aio::ConnectionManager,
    closed: AtomicBool,
}

impl RedisStateStore {
    pub async fn connect(config: RedisStateConfig) -> Result<Self, StateError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| StateError::Unavailable(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| StateError::Unavailable(e.to_string()))?;
        Ok(Self { conn, closed: AtomicBool::new(false) })
    }

    fn check_closed(&self) -> Result<(), StateError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StateError::Other("store is closed".to_string()));
        }
        Ok(())
    }
}

fn ttl_arg(ttl: Option<Duration>) -> String {
    ttl.map(|d| d.as_secs().to_string()).unwrap_or_default()
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn load(&self, key: &str) -> Result<Option<(Bytes, Version)>, StateError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let (value, version): (Option<Vec<u8>>, Option<String>) = redis::cmd("HMGET")
            .arg(key)
            .arg("value")
            .arg("version")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        let Some(value) = value else {
            return Ok(None);
        };
        let version = version.unwrap_or_else(|| ABSENT_VERSION.to_string());
        Ok(Some((Bytes::from(value), Version(version))))
    }

    async fn store(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StateError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        redis::Script::new(STORE_SCRIPT)
            .key(key)
            .arg(value.as_ref())
            .arg(ttl_arg(ttl))
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn store_if_unchanged(
        &self,
        key: &str,
        value: Bytes,
        expected: &Version,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let result: i64 = redis::Script::new(CAS_SCRIPT)
            .key(key)
            .arg(&expected.0)
            .arg(value.as_ref())
            .arg(ttl_arg(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(result >= 0)
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn scan(&self, prefix: &str, max_results: Option<u32>) -> Result<Vec<String>, StateError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut results = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(map_redis_err)?;

            results.extend(keys);
            if let Some(max) = max_results
                && results.len() >= max as usize
            {
                results.truncate(max as usize);
                return Ok(results);
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(results)
    }

    async fn ping(&self) -> Result<bool, StateError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(pong == "PONG")
    }

    async fn close(&self) -> Result<(), StateError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
