use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::BrokerError;

/// One delivered stream entry: the broker-assigned `entry_id`, the raw
/// payload bytes (an encoded envelope), and Redis's own authoritative
/// delivery count for this entry (`XPENDING`'s delivery counter).
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub entry_id: String,
    pub payload: Bytes,
    pub delivery_count: u64,
}

/// Abstracts the four Redis command families the core speaks: streams,
/// lists, entity keys (handled by `dax-state`, not here), and counters.
///
/// A stream entry carries a single field whose value is the encoded
/// envelope bytes; the broker never interprets payload contents.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotently create `group` on `stream` (`MKSTREAM`), tolerating
    /// the "group already exists" signal.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError>;

    /// Append `payload` to `stream`. Returns the broker-assigned entry id.
    async fn append(&self, stream: &str, payload: Bytes) -> Result<String, BrokerError>;

    /// Read up to `batch_size` new entries (the `>` sentinel) for
    /// `consumer` in `group`, blocking up to `block` for the first entry.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        batch_size: u32,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    /// Commit processing of `entry_id`.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError>;

    /// Claim up to `batch_size` entries idle longer than `min_idle` for
    /// `consumer`, surfacing each entry's authoritative delivery count.
    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        batch_size: u32,
    ) -> Result<Vec<StreamEntry>, BrokerError>;

    /// Append `payload` to the list at `key` (`RPUSH`).
    async fn push(&self, key: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Apply a TTL to `key` so an abandoned response list does not leak.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BrokerError>;

    /// Pop one value from the list at `key`, blocking up to `timeout`.
    /// `None` on timeout.
    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>, BrokerError>;

    /// Atomically increment the counter at `key` by `delta` and (re)apply
    /// `ttl`, returning the new value. The window segment of `key` itself
    /// carries the reset semantics; this call never resets on its own.
    async fn incr_with_expiry(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, BrokerError>;

    /// Current counter value without incrementing; `0` if absent.
    async fn get_counter(&self, key: &str) -> Result<i64, BrokerError>;

    async fn ping(&self) -> Result<bool, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}
