use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Broker(#[from] dax_broker::BrokerError),

    #[error(transparent)]
    Envelope(#[from] dax_envelope::EnvelopeError),

    #[error("pseudo-sync wait timed out")]
    Timeout,

    #[error("response was a poison message: {0}")]
    Poison(#[from] dax_envelope::PoisonError),
}
