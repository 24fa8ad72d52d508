use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dax_broker::{Broker, BrokerError, StreamEntry};

use crate::config::RedisBrokerConfig;
use crate::error::{is_timeout_nil, map_redis_err};

pub struct RedisBroker {
    conn: redis::aio::ConnectionManager,
    closed: AtomicBool,
}

impl RedisBroker {
    pub async fn connect(config: RedisBrokerConfig) -> Result<Self, BrokerError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;
        Ok(Self { conn, closed: AtomicBool::new(false) })
    }

    fn check_closed(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Other("broker is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(BrokerError::Stream(e.to_string())),
        }
    }

    async fn append(&self, stream: &str, payload: Bytes) -> Result<String, BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("payload")
            .arg(payload.as_ref())
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(entry_id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        batch_size: u32,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let result: Result<redis::streams::StreamReadReply, _> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(batch_size)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if is_timeout_nil(&e) => return Ok(Vec::new()),
            Err(e) => return Err(BrokerError::Stream(e.to_string())),
        };

        let mut entries = Vec::new();
        for key in &reply.keys {
            for id in &key.ids {
                let payload: Option<Vec<u8>> = id.get("payload");
                if let Some(payload) = payload {
                    entries.push(StreamEntry {
                        entry_id: id.id.clone(),
                        payload: Bytes::from(payload),
                        delivery_count: 1,
                    });
                } else {
                    tracing::warn!(entry_id = %id.id, "stream entry missing 'payload' field");
                }
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(entry_id)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        batch_size: u32,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let min_idle_ms = min_idle.as_millis() as u64;

        let pending: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(batch_size)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let delivery_counts: HashMap<String, u64> =
            pending.iter().map(|(id, _consumer, _idle, count)| (id.clone(), *count as u64)).collect();

        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer).arg(min_idle_ms);
        for (id, _, _, _) in &pending {
            cmd.arg(id);
        }

        let claimed: redis::streams::StreamClaimReply =
            cmd.query_async(&mut conn).await.map_err(map_redis_err)?;

        let mut entries = Vec::new();
        for id in &claimed.ids {
            let payload: Option<Vec<u8>> = id.get("payload");
            if let Some(payload) = payload {
                let delivery_count = delivery_counts.get(&id.id).copied().unwrap_or(1);
                entries.push(StreamEntry { entry_id: id.id.clone(), payload: Bytes::from(payload), delivery_count });
            }
        }
        Ok(entries)
    }

    async fn push(&self, key: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(payload.as_ref())
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs() as i64)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(())
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>, BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let secs = timeout.as_secs_f64().max(0.001);
        let result: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(secs)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(result.map(|(_, value)| Bytes::from(value)))
    }

    async fn incr_with_expiry(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let (value, _): (i64, i64) = redis::pipe()
            .atomic()
            .cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs() as i64)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(value)
    }

    async fn get_counter(&self, key: &str) -> Result<i64, BrokerError> {
        self.check_closed()?;
        let mut conn = self.conn.clone();
        let value: Option<i64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(value.unwrap_or(0))
    }

    async fn ping(&self) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(map_redis_err)?;
        Ok(pong == "PONG")
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
