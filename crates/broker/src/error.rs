use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("stream operation failed: {0}")]
    Stream(String),

    #[error("{0}")]
    Other(String),
}
