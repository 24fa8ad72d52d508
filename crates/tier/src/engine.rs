use std::sync::Arc;

use dax_broker::Broker;
use dax_keyspace::Keyspace;

use crate::error::TierError;
use crate::table::{LimitSpec, TierTable};

/// Sits between the worker and the handler when a service opts into
/// quota/capability enforcement. Stateless beyond the table itself —
/// `validate` and `record` read/write counters through `dax-broker`, never
/// holding any in-process tally.
pub struct TierPolicyEngine {
    service: String,
    table: TierTable,
    keyspace: Keyspace,
    broker: Arc<dyn Broker>,
}

impl TierPolicyEngine {
    pub fn new(service: impl Into<String>, table: TierTable, keyspace: Keyspace, broker: Arc<dyn Broker>) -> Self {
        Self { service: service.into(), table, keyspace, broker }
    }

    /// `current_count` is consulted only for `MaxCount` resources — the
    /// table has no notion of "how many exist", that count is injected by
    /// the caller (§4.6).
    ///
    /// Not atomic with `record`: two concurrent callers can both observe
    /// headroom and both proceed, overshooting the limit by up to the
    /// number of concurrent callers. This is documented behavior, not a
    /// bug — a service wanting a hard cap must serialize the resource
    /// itself.
    pub async fn validate(
        &self,
        tenant_id: &str,
        tier: &str,
        resource: &str,
        amount: u64,
        current_count: Option<u64>,
    ) -> Result<(), TierError> {
        match self.table.limit(tier, resource)? {
            LimitSpec::Capability { enabled } => {
                if *enabled {
                    Ok(())
                } else {
                    Err(TierError::CapabilityDenied { tier: tier.to_string(), resource: resource.to_string() })
                }
            }
            LimitSpec::MaxCount { limit } => {
                let current = current_count.ok_or(TierError::MissingCurrentCount)?;
                if current + amount <= *limit {
                    Ok(())
                } else {
                    Err(TierError::LimitExceeded {
                        resource: resource.to_string(),
                        tier: tier.to_string(),
                        limit: *limit,
                        current,
                    })
                }
            }
            LimitSpec::Quota { limit, window } => {
                let key = self.keyspace.usage(&self.service, tenant_id, resource, &window.current_segment());
                let current = self.broker.get_counter(&key).await?.max(0) as u64;
                if current + amount <= *limit {
                    Ok(())
                } else {
                    Err(TierError::LimitExceeded {
                        resource: resource.to_string(),
                        tier: tier.to_string(),
                        limit: *limit,
                        current,
                    })
                }
            }
        }
    }

    /// Only `Quota` resources have a counter to account against;
    /// `MaxCount` existence and `Capability` flags are owned by the caller.
    pub async fn record(&self, tenant_id: &str, tier: &str, resource: &str, amount: u64) -> Result<(), TierError> {
        if let LimitSpec::Quota { window, .. } = self.table.limit(tier, resource)? {
            let key = self.keyspace.usage(&self.service, tenant_id, resource, &window.current_segment());
            self.broker.incr_with_expiry(&key, amount as i64, window.ttl()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dax_broker_memory::MemoryBroker;

    fn engine(table: TierTable) -> TierPolicyEngine {
        TierPolicyEngine::new("billing", table, Keyspace::new("dax", "test"), Arc::new(MemoryBroker::new()))
    }

    fn quota_table() -> TierTable {
        TierTable::from_json(serde_json::json!({
            "free": {"embedding_tokens": {"kind": "quota", "limit": 100, "window": "daily"}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn quota_validate_passes_under_limit_then_rejects_over() {
        let engine = engine(quota_table());
        engine.validate("t1", "free", "embedding_tokens", 50, None).await.unwrap();
        engine.record("t1", "free", "embedding_tokens", 50).await.unwrap();

        engine.validate("t1", "free", "embedding_tokens", 50, None).await.unwrap();
        engine.record("t1", "free", "embedding_tokens", 50).await.unwrap();

        let err = engine.validate("t1", "free", "embedding_tokens", 1, None).await.unwrap_err();
        assert!(matches!(err, TierError::LimitExceeded { current: 100, limit: 100, .. }));
    }

    #[tokio::test]
    async fn capability_false_is_denied() {
        let table = TierTable::from_json(serde_json::json!({
            "free": {"custom_templates": {"kind": "capability", "enabled": false}}
        }))
        .unwrap();
        let engine = engine(table);
        let err = engine.validate("t1", "free", "custom_templates", 1, None).await.unwrap_err();
        assert!(matches!(err, TierError::CapabilityDenied { .. }));
    }

    #[tokio::test]
    async fn max_count_without_injected_current_is_an_error() {
        let table = TierTable::from_json(serde_json::json!({
            "free": {"agents": {"kind": "max_count", "limit": 1}}
        }))
        .unwrap();
        let engine = engine(table);
        assert!(matches!(
            engine.validate("t1", "free", "agents", 1, None).await,
            Err(TierError::MissingCurrentCount)
        ));
        engine.validate("t1", "free", "agents", 1, Some(0)).await.unwrap();
        assert!(matches!(
            engine.validate("t1", "free", "agents", 1, Some(1)).await,
            Err(TierError::LimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn different_tenants_do_not_share_a_counter() {
        let engine = engine(quota_table());
        engine.record("t1", "free", "embedding_tokens", 100).await.unwrap();
        // t2 has its own counter under its own usage key; unaffected by t1's spend.
        engine.validate("t2", "free", "embedding_tokens", 100, None).await.unwrap();
    }
}
