use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use dax_broker::{Broker, BrokerError, StreamEntry};

use crate::store::{MemoryState, PendingEntry};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// In-memory `Broker`. Single process, single instance — intended for
/// unit tests, not for sharing state across processes.
pub struct MemoryBroker {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(MemoryState::default())) }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.group(stream, group);
        Ok(())
    }

    async fn append(&self, stream: &str, payload: Bytes) -> Result<String, BrokerError> {
        let mut state = self.state.lock().await;
        let s = state.stream(stream);
        let seq = s.next_seq;
        s.next_seq += 1;
        let id = format!("mem-{seq}");
        s.entries.push(crate::store::InternalEntry { id: id.clone(), payload });
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        batch_size: u32,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut state = self.state.lock().await;
                let total = state.stream(stream).entries.len();
                let cursor = state.group(stream, group).cursor;

                if cursor < total {
                    let take = batch_size as usize;
                    let mut out = Vec::new();
                    let end = total.min(cursor + take);
                    for idx in cursor..end {
                        let entry_id = state.streams.get(stream).expect("stream exists").entries[idx].id.clone();
                        let payload = state.streams.get(stream).expect("stream exists").entries[idx].payload.clone();
                        out.push(StreamEntry { entry_id: entry_id.clone(), payload, delivery_count: 1 });
                        state.group(stream, group).pending.insert(
                            entry_id,
                            PendingEntry { index: idx, delivered_at: Instant::now(), delivery_count: 1 },
                        );
                    }
                    state.group(stream, group).cursor = end;
                    return Ok(out);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1)))).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.group(stream, group).pending.remove(entry_id);
        Ok(())
    }

    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        _consumer: &str,
        min_idle: Duration,
        batch_size: u32,
    ) -> Result<Vec<StreamEntry>, BrokerError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let stale_ids: Vec<String> = state
            .group(stream, group)
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
            .take(batch_size as usize)
            .map(|(id, _)| id.clone())
            .collect();

        let mut out = Vec::new();
        for id in stale_ids {
            let index = state.group(stream, group).pending.get(&id).expect("just matched").index;
            let payload = state.streams.get(stream).expect("stream exists").entries[index].payload.clone();
            let group_state = state.group(stream, group);
            let entry = group_state.pending.get_mut(&id).expect("just matched");
            entry.delivery_count += 1;
            entry.delivered_at = now;
            out.push(StreamEntry { entry_id: id, payload, delivery_count: entry.delivery_count });
        }
        Ok(out)
    }

    async fn push(&self, key: &str, payload: Bytes) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        state.reap_list(key);
        state
            .lists
            .entry(key.to_string())
            .or_insert_with(|| crate::store::Keyed { value: Default::default(), expires_at: None })
            .value
            .push_back(payload);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.lists.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<Bytes>, BrokerError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                state.reap_list(key);
                if let Some(entry) = state.lists.get_mut(key)
                    && let Some(value) = entry.value.pop_front()
                {
                    return Ok(Some(value));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1)))).await;
        }
    }

    async fn incr_with_expiry(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, BrokerError> {
        let mut state = self.state.lock().await;
        state.reap_counter(key);
        let entry = state
            .counters
            .entry(key.to_string())
            .or_insert_with(|| crate::store::Keyed { value: 0, expires_at: None });
        entry.value += delta;
        entry.expires_at = Some(Instant::now() + ttl);
        Ok(entry.value)
    }

    async fn get_counter(&self, key: &str) -> Result<i64, BrokerError> {
        let mut state = self.state.lock().await;
        state.reap_counter(key);
        Ok(state.counters.get(key).map(|e| e.value).unwrap_or(0))
    }

    async fn ping(&self) -> Result<bool, BrokerError> {
        Ok(true)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}
