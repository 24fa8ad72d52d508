use bytes::Bytes;
use thiserror::Error;

/// A message failed to decode as a well-formed envelope.
///
/// Carries the raw bytes so the caller (the Stream Worker) can route them
/// to a dead-letter stream without re-reading the source entry.
#[derive(Debug, Error)]
#[error("poison message: {source}")]
pub struct PoisonError {
    pub raw: Bytes,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Poison(#[from] PoisonError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
