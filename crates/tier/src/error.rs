use thiserror::Error;

#[derive(Debug, Error)]
pub enum TierError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("resource {resource} is not defined for tier {tier}")]
    UnknownResource { tier: String, resource: String },

    #[error("{resource} limit exceeded for tier {tier}: {current} + requested > {limit}")]
    LimitExceeded { resource: String, tier: String, limit: u64, current: u64 },

    #[error("capability {resource} is not enabled for tier {tier}")]
    CapabilityDenied { tier: String, resource: String },

    #[error("max-count resources require an injected current count")]
    MissingCurrentCount,

    #[error(transparent)]
    Broker(#[from] dax_broker::BrokerError),

    #[error("invalid tier table: {0}")]
    Config(String),
}
