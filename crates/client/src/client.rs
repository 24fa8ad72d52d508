use std::sync::Arc;
use std::time::Duration;

use dax_broker::Broker;
use dax_envelope::{DomainAction, DomainActionResponse, decode_response, encode, new_action_id, new_correlation_id, new_trace_id, now_millis};
use dax_keyspace::Keyspace;

use crate::error::ClientError;

/// Response lists outlive the caller's wait by this margin so a slow
/// reply that arrives just after the caller gives up is still observable
/// for debugging, but still bounded (S3).
const RESPONSE_TTL_MARGIN: Duration = Duration::from_secs(3);

/// One object per emitting service. Carries `origin_service`'s identity;
/// the three emit modes differ only in which envelope fields they set
/// and what they do after append.
pub struct DomainActionClient {
    origin_service: String,
    keyspace: Keyspace,
    broker: Arc<dyn Broker>,
}

impl DomainActionClient {
    pub fn new(origin_service: impl Into<String>, keyspace: Keyspace, broker: Arc<dyn Broker>) -> Self {
        Self { origin_service: origin_service.into(), keyspace, broker }
    }

    pub fn origin_service(&self) -> &str {
        &self.origin_service
    }

    /// Stamps the fields the Client always owns: `origin_service`,
    /// `action_id`, `created_at`, and `trace_id` (propagated if the
    /// caller already set one, generated otherwise — callers signal "no
    /// trace yet" by leaving the field empty).
    fn stamp(&self, action: &mut DomainAction) {
        action.origin_service = self.origin_service.clone();
        action.action_id = new_action_id();
        action.created_at = now_millis();
        if action.trace_id.is_empty() {
            action.trace_id = new_trace_id();
        }
    }

    /// Fire-and-forget: append and return. No reply is awaited.
    pub async fn send_async(&self, mut action: DomainAction) -> Result<String, ClientError> {
        self.stamp(&mut action);
        let target = self.keyspace.actions(&action.target_service);
        let bytes = encode(&action)?;
        self.broker.append(&target, bytes).await?;
        Ok(action.action_id)
    }

    /// Pseudo-sync: append, then block for a reply on a dedicated,
    /// single-use response list. Append and the wait are issued strictly
    /// in that order so the reply can never be lost to a late subscribe.
    pub async fn send_and_wait(
        &self,
        mut action: DomainAction,
        timeout: Duration,
    ) -> Result<DomainActionResponse, ClientError> {
        self.stamp(&mut action);
        action.correlation_id = Some(new_correlation_id());
        let response_key = self.keyspace.responses(&self.origin_service, action.correlation_id.as_ref().unwrap());
        action.callback_queue_name = Some(response_key.clone());

        let target = self.keyspace.actions(&action.target_service);
        let bytes = encode(&action)?;
        self.broker.append(&target, bytes).await?;

        // Defensive TTL: guarantees the key expires even if the client is
        // cancelled before ever reading it, per the cancellation-safety
        // contract (there is nothing on the list yet; this just bounds
        // the key's lifetime regardless of who writes to it first).
        self.broker.expire(&response_key, timeout + RESPONSE_TTL_MARGIN).await?;

        let Some(raw) = self.broker.blocking_pop(&response_key, timeout).await? else {
            return Err(ClientError::Timeout);
        };

        Ok(decode_response(raw)?)
    }

    /// Async-with-callback: append and return immediately. The caller's
    /// own callback stream receives a fresh action later, carrying the
    /// same `correlation_id` and `trace_id`. `action.callback_action_type`
    /// must already be set by the caller to the action type it wants its
    /// own dispatch table to route the callback to.
    pub async fn send_with_callback(&self, mut action: DomainAction) -> Result<String, ClientError> {
        self.stamp(&mut action);
        if action.correlation_id.is_none() {
            action.correlation_id = Some(new_correlation_id());
        }
        action.callback_queue_name = Some(self.keyspace.callbacks(&self.origin_service));

        let target = self.keyspace.actions(&action.target_service);
        let bytes = encode(&action)?;
        self.broker.append(&target, bytes).await?;
        Ok(action.action_id)
    }
}
