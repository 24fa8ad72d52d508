use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupted payload at key '{key}': {source}")]
    DataCorruption { key: String, source: serde_json::Error },

    #[error("{0}")]
    Other(String),
}
