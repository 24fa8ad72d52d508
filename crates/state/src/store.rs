use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::StateError;

/// Opaque version token returned by [`StateStore::load`]. Callers must
/// treat it as opaque and pass it back unchanged to
/// [`StateStore::store_if_unchanged`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(pub String);

/// Typed storage over Redis for entities whose schema the caller supplies.
///
/// Implementations must back `scan` with cursor iteration; the blocking
/// full-keyspace scan (`KEYS`) is never acceptable, even for maintenance
/// callers.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Current value and version, or `None` if the key is absent.
    /// Corrupted payloads are a `DataCorruption` error, never silently
    /// dropped.
    async fn load(&self, key: &str) -> Result<Option<(Bytes, Version)>, StateError>;

    /// Last-writer-wins write.
    async fn store(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), StateError>;

    /// Optimistic update: succeeds iff the stored version still matches
    /// `expected`. Implemented as a single round trip; never busy-loops.
    async fn store_if_unchanged(
        &self,
        key: &str,
        value: Bytes,
        expected: &Version,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError>;

    async fn delete(&self, key: &str) -> Result<(), StateError>;

    /// Keys matching `prefix`, found via cursor iteration. `max_results`
    /// bounds maintenance scans; intended for maintenance, not the request
    /// path.
    async fn scan(&self, prefix: &str, max_results: Option<u32>) -> Result<Vec<String>, StateError>;

    async fn ping(&self) -> Result<bool, StateError>;

    async fn close(&self) -> Result<(), StateError>;
}

/// Convenience wrapper serializing typed values through the store's byte
/// interface via the same codec convention the envelope uses (stable-order
/// JSON).
pub mod typed {
    use super::{StateError, StateStore, Version};
    use bytes::Bytes;
    use serde::Serialize;
    use serde::de::DeserializeOwned;
    use std::time::Duration;

    pub async fn load<T: DeserializeOwned>(
        store: &dyn StateStore,
        key: &str,
    ) -> Result<Option<(T, Version)>, StateError> {
        let Some((raw, version)) = store.load(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&raw)
            .map_err(|source| StateError::DataCorruption { key: key.to_string(), source })?;
        Ok(Some((value, version)))
    }

    pub async fn store<T: Serialize + Sync>(
        store: &dyn StateStore,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let raw = serde_json::to_vec(value).map_err(|e| StateError::Other(e.to_string()))?;
        store.store(key, Bytes::from(raw), ttl).await
    }

    pub async fn store_if_unchanged<T: Serialize + Sync>(
        store: &dyn StateStore,
        key: &str,
        value: &T,
        expected: &Version,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let raw = serde_json::to_vec(value).map_err(|e| StateError::Other(e.to_string()))?;
        store.store_if_unchanged(key, Bytes::from(raw), expected, ttl).await
    }
}
