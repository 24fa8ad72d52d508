use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use bytes::Bytes;

pub(crate) struct InternalEntry {
    pub id: String,
    pub payload: Bytes,
}

pub(crate) struct PendingEntry {
    pub index: usize,
    pub delivered_at: Instant,
    pub delivery_count: u64,
}

pub(crate) struct GroupState {
    pub cursor: usize,
    pub pending: HashMap<String, PendingEntry>,
}

impl GroupState {
    fn new() -> Self {
        Self { cursor: 0, pending: HashMap::new() }
    }
}

pub(crate) struct StreamState {
    pub entries: Vec<InternalEntry>,
    pub groups: HashMap<String, GroupState>,
    pub next_seq: u64,
}

impl StreamState {
    fn new() -> Self {
        Self { entries: Vec::new(), groups: HashMap::new(), next_seq: 0 }
    }
}

pub(crate) struct Keyed<T> {
    pub value: T,
    pub expires_at: Option<Instant>,
}

#[derive(Default)]
pub(crate) struct MemoryState {
    pub streams: HashMap<String, StreamState>,
    pub lists: HashMap<String, Keyed<VecDeque<Bytes>>>,
    pub counters: HashMap<String, Keyed<i64>>,
}

impl MemoryState {
    pub fn stream(&mut self, name: &str) -> &mut StreamState {
        self.streams.entry(name.to_string()).or_insert_with(StreamState::new)
    }

    pub fn group(&mut self, stream: &str, group: &str) -> &mut GroupState {
        self.stream(stream).groups.entry(group.to_string()).or_insert_with(GroupState::new)
    }

    /// Drops `key` from `lists`/`counters` if its TTL has elapsed; called
    /// lazily on access since the in-memory backend has no background
    /// reaper.
    pub fn reap_list(&mut self, key: &str) {
        if let Some(entry) = self.lists.get(key)
            && entry.expires_at.is_some_and(|at| Instant::now() >= at)
        {
            self.lists.remove(key);
        }
    }

    pub fn reap_counter(&mut self, key: &str) {
        if let Some(entry) = self.counters.get(key)
            && entry.expires_at.is_some_and(|at| Instant::now() >= at)
        {
            self.counters.remove(key);
        }
    }
}
