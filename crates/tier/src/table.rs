use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TierError;
use crate::window::Window;

/// One resource's limit shape within a tier row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimitSpec {
    /// Caller supplies the current count (e.g. "how many agents exist");
    /// the table only holds the ceiling.
    MaxCount { limit: u64 },
    /// A rolling quota backed by a counter keyed by `(tenant_id, resource,
    /// window segment)`.
    Quota { limit: u64, window: Window },
    /// A plain on/off feature gate.
    Capability { enabled: bool },
}

/// `tier_name -> resource_name -> limit_spec`, loaded once at startup.
///
/// Unknown resource names at a validation site are a programming error
/// (§4.6), so lookups return `UnknownResource` rather than a default —
/// callers are expected to have defined every resource they validate
/// against in every tier they serve.
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    tiers: HashMap<String, HashMap<String, LimitSpec>>,
}

impl TierTable {
    pub fn from_json(value: serde_json::Value) -> Result<Self, TierError> {
        let tiers: HashMap<String, HashMap<String, LimitSpec>> =
            serde_json::from_value(value).map_err(|e| TierError::Config(e.to_string()))?;
        Ok(Self { tiers })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TierError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TierError::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        let value: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| TierError::Config(e.to_string()))?;
        Self::from_json(value)
    }

    pub fn limit(&self, tier: &str, resource: &str) -> Result<&LimitSpec, TierError> {
        let row = self.tiers.get(tier).ok_or_else(|| TierError::UnknownTier(tier.to_string()))?;
        row.get(resource).ok_or_else(|| TierError::UnknownResource {
            tier: tier.to_string(),
            resource: resource.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_limit_shapes() {
        let table = TierTable::from_json(serde_json::json!({
            "free": {
                "agents": {"kind": "max_count", "limit": 1},
                "embedding_tokens": {"kind": "quota", "limit": 10000, "window": "daily"},
                "custom_templates": {"kind": "capability", "enabled": false},
            }
        }))
        .unwrap();

        assert!(matches!(table.limit("free", "agents").unwrap(), LimitSpec::MaxCount { limit: 1 }));
        assert!(matches!(
            table.limit("free", "embedding_tokens").unwrap(),
            LimitSpec::Quota { limit: 10000, window: Window::Daily }
        ));
        assert!(matches!(
            table.limit("free", "custom_templates").unwrap(),
            LimitSpec::Capability { enabled: false }
        ));
    }

    #[test]
    fn unknown_tier_is_an_error() {
        let table = TierTable::default();
        assert!(matches!(table.limit("free", "agents"), Err(TierError::UnknownTier(_))));
    }

    #[test]
    fn unknown_resource_is_an_error() {
        let table = TierTable::from_json(serde_json::json!({"free": {}})).unwrap();
        assert!(matches!(
            table.limit("free", "agents"),
            Err(TierError::UnknownResource { .. })
        ));
    }
}
