use std::sync::Arc;

use async_trait::async_trait;
use dax_envelope::{ActionError, DomainAction};
use dax_keyspace::Keyspace;
use dax_state::StateStore;
use dax_tier::{TierError, TierPolicyEngine};
use dax_worker::PolicyGate;

/// Bridges [`TierPolicyEngine`] into the [`PolicyGate`] shape `dax-worker`
/// expects. Lives here rather than in `dax-tier` or `dax-worker` themselves
/// so neither of those crates has to depend on the other just for this one
/// adapter — `dax-runtime` already depends on both.
///
/// Resource name is taken to be the action's `action_type`; tenant tier is
/// looked up from the State Manager under
/// `Keyspace::state(service, &["tenant_tier", tenant_id])`, where it is
/// expected to be stored as a bare JSON string. Actions with no
/// `tenant_id` are not subject to tier enforcement.
pub struct TierGate {
    engine: TierPolicyEngine,
    state: Arc<dyn StateStore>,
    keyspace: Keyspace,
    service: String,
}

impl TierGate {
    pub fn new(engine: TierPolicyEngine, state: Arc<dyn StateStore>, keyspace: Keyspace, service: impl Into<String>) -> Self {
        Self { engine, state, keyspace, service: service.into() }
    }

    async fn tenant_tier(&self, tenant_id: &str) -> Result<String, ActionError> {
        let key = self.keyspace.state(&self.service, &["tenant_tier", tenant_id]);
        match dax_state::typed::load::<String>(self.state.as_ref(), &key).await {
            Ok(Some((tier, _))) => Ok(tier),
            Ok(None) => Err(ActionError::new("TierLimitExceeded", format!("no tier assigned for tenant {tenant_id}"))),
            Err(err) => Err(ActionError::new("Unavailable", err.to_string())),
        }
    }
}

#[async_trait]
impl PolicyGate for TierGate {
    async fn validate(&self, action: &DomainAction) -> Result<(), ActionError> {
        let Some(tenant_id) = action.tenant_id.clone() else { return Ok(()) };
        let tier = self.tenant_tier(&tenant_id).await?;
        let amount = request_amount(action);
        self.engine
            .validate(&tenant_id, &tier, &action.action_type, amount, None)
            .await
            .map_err(tier_error_to_action_error)
    }

    async fn record(&self, action: &DomainAction, success: bool) {
        if !success {
            return;
        }
        let Some(tenant_id) = action.tenant_id.clone() else { return };
        let Ok(tier) = self.tenant_tier(&tenant_id).await else { return };
        let amount = request_amount(action);
        if let Err(err) = self.engine.record(&tenant_id, &tier, &action.action_type, amount).await {
            tracing::warn!(action_id = %action.action_id, "tier usage recording failed: {err}");
        }
    }
}

/// Magnitude of the resource this action consumes (S5: a payload like
/// `{"estimated_tokens": 50}` must validate against the tenant's quota as
/// 50 units, not 1). Checked against a handful of conventional field names
/// on `action.data` since the generic `PolicyGate` bridge has no per
/// action-type schema to consult; actions that carry none of them — or
/// whose `data` isn't an object — count as a single unit, matching
/// `MaxCount`/`Capability` resources where no magnitude applies.
const AMOUNT_FIELDS: &[&str] = &["amount", "estimated_tokens", "count", "quantity"];

fn request_amount(action: &DomainAction) -> u64 {
    let Some(data) = action.data.as_object() else { return 1 };
    AMOUNT_FIELDS
        .iter()
        .find_map(|field| data.get(*field))
        .and_then(|value| value.as_u64())
        .unwrap_or(1)
}

fn tier_error_to_action_error(err: TierError) -> ActionError {
    match err {
        TierError::LimitExceeded { resource, tier, limit, current } => {
            ActionError::new("TierLimitExceeded", err.to_string())
                .with_code("TIER_LIMIT_EXCEEDED")
                .with_details(serde_json::json!({"resource": resource, "tier": tier, "limit": limit, "current": current}))
        }
        TierError::CapabilityDenied { tier, resource } => ActionError::new("TierLimitExceeded", err.to_string())
            .with_code("TIER_CAPABILITY_DENIED")
            .with_details(serde_json::json!({"resource": resource, "tier": tier})),
        other => ActionError::new("TierPolicyError", other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dax_broker_memory::MemoryBroker;
    use dax_state::{StateError, Version};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Minimal in-process `StateStore` exercising only what `TierGate`
    /// needs (`load`/`store`) — there is no shared in-memory state-store
    /// crate, so this stays a private test fixture.
    #[derive(Default)]
    struct FakeStateStore {
        entries: Mutex<HashMap<String, (bytes::Bytes, Version)>>,
    }

    #[async_trait]
    impl StateStore for FakeStateStore {
        async fn load(&self, key: &str) -> Result<Option<(bytes::Bytes, Version)>, StateError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }
        async fn store(&self, key: &str, value: bytes::Bytes, _ttl: Option<std::time::Duration>) -> Result<(), StateError> {
            self.entries.lock().unwrap().insert(key.to_string(), (value, Version("1".into())));
            Ok(())
        }
        async fn store_if_unchanged(
            &self,
            _key: &str,
            _value: bytes::Bytes,
            _expected: &Version,
            _ttl: Option<std::time::Duration>,
        ) -> Result<bool, StateError> {
            unimplemented!("not exercised by TierGate")
        }
        async fn delete(&self, key: &str) -> Result<(), StateError> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }
        async fn scan(&self, _prefix: &str, _max_results: Option<u32>) -> Result<Vec<String>, StateError> {
            unimplemented!("not exercised by TierGate")
        }
        async fn ping(&self) -> Result<bool, StateError> {
            Ok(true)
        }
        async fn close(&self) -> Result<(), StateError> {
            Ok(())
        }
    }

    fn keyspace() -> Keyspace {
        Keyspace::new("dax", "test")
    }

    fn action(tenant_id: Option<&str>) -> DomainAction {
        DomainAction {
            action_id: "a1".into(),
            action_type: "embedding_tokens".into(),
            origin_service: "agent-core".into(),
            target_service: "billing".into(),
            tenant_id: tenant_id.map(str::to_string),
            user_id: None,
            session_id: None,
            task_id: None,
            trace_id: "t1".into(),
            correlation_id: None,
            data: serde_json::Value::Null,
            metadata: None,
            callback_queue_name: None,
            callback_action_type: None,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn action_with_no_tenant_id_bypasses_tier_enforcement() {
        let table = dax_tier::TierTable::from_json(serde_json::json!({})).unwrap();
        let engine = TierPolicyEngine::new("billing", table, keyspace(), Arc::new(MemoryBroker::new()));
        let gate = TierGate::new(engine, Arc::new(FakeStateStore::default()), keyspace(), "billing");

        gate.validate(&action(None)).await.unwrap();
    }

    #[tokio::test]
    async fn unassigned_tenant_is_rejected() {
        let table = dax_tier::TierTable::from_json(serde_json::json!({
            "free": {"embedding_tokens": {"kind": "quota", "limit": 100, "window": "daily"}}
        }))
        .unwrap();
        let engine = TierPolicyEngine::new("billing", table, keyspace(), Arc::new(MemoryBroker::new()));
        let gate = TierGate::new(engine, Arc::new(FakeStateStore::default()), keyspace(), "billing");

        let err = gate.validate(&action(Some("t1"))).await.unwrap_err();
        assert_eq!(err.error_type, "TierLimitExceeded");
    }

    #[tokio::test]
    async fn assigned_tenant_is_validated_against_their_tier() {
        let table = dax_tier::TierTable::from_json(serde_json::json!({
            "free": {"embedding_tokens": {"kind": "quota", "limit": 1, "window": "daily"}}
        }))
        .unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let engine = TierPolicyEngine::new("billing", table, keyspace(), broker.clone());
        let state = Arc::new(FakeStateStore::default());
        let key = keyspace().state("billing", &["tenant_tier", "t1"]);
        dax_state::typed::store(state.as_ref(), &key, &"free".to_string(), None).await.unwrap();
        let gate = TierGate::new(engine, state, keyspace(), "billing");

        gate.validate(&action(Some("t1"))).await.unwrap();
        gate.record(&action(Some("t1")), true).await;

        let err = gate.validate(&action(Some("t1"))).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("TIER_LIMIT_EXCEEDED"));
    }

    #[tokio::test]
    async fn request_magnitude_is_read_from_the_action_payload() {
        let table = dax_tier::TierTable::from_json(serde_json::json!({
            "free": {"embedding_tokens": {"kind": "quota", "limit": 1000, "window": "daily"}}
        }))
        .unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let engine = TierPolicyEngine::new("billing", table, keyspace(), broker.clone());
        let state = Arc::new(FakeStateStore::default());
        let key = keyspace().state("billing", &["tenant_tier", "t1"]);
        dax_state::typed::store(state.as_ref(), &key, &"free".to_string(), None).await.unwrap();
        let gate = TierGate::new(engine, state, keyspace(), "billing");

        // Current usage already at 999/1000; a request for 50 more tokens
        // must be rejected even though a single-unit count would pass.
        let usage_key = keyspace().usage("billing", "t1", "embedding_tokens", &dax_tier::Window::Daily.current_segment());
        broker.incr_with_expiry(&usage_key, 999, std::time::Duration::from_secs(86400)).await.unwrap();

        let mut request = action(Some("t1"));
        request.data = serde_json::json!({"estimated_tokens": 50});

        let err = gate.validate(&request).await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some("TIER_LIMIT_EXCEEDED"));
    }
}
