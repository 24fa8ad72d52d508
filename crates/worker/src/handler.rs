use async_trait::async_trait;
use dax_envelope::{ActionError, DomainAction};
use serde_json::Value;

use crate::error::HandlerError;

/// The single capability a hosting service implements: turn one decoded
/// action into an optional reply payload, or a structured error.
///
/// `None` on success means "no data to return" (still a success reply for
/// pseudo-sync callers, still no callback payload for async-with-callback
/// callers — the envelope's `data` field is simply omitted).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, action: DomainAction) -> Result<Option<Value>, HandlerError>;
}

/// Consulted before `Handler::handle`, when a service opts a worker into
/// tenant-tier enforcement. Kept separate from `Handler` so a service that
/// doesn't need quotas never has to depend on the tier engine at all; the
/// two are composed by whoever builds the `Worker` (typically the runtime
/// crate, which already depends on both).
#[async_trait]
pub trait PolicyGate: Send + Sync {
    async fn validate(&self, action: &DomainAction) -> Result<(), ActionError>;

    /// Best-effort usage recording after a handler invocation completes.
    /// `success` reflects whether the handler itself succeeded; recording
    /// never blocks the reply path, so failures here are logged, not
    /// propagated.
    async fn record(&self, action: &DomainAction, success: bool);
}
