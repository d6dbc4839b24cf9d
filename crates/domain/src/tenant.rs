use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Billing tier of a tenant. Paid tenants never consume shared keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Paid,
}

/// Per-tenant configuration consulted by the provider resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub tier: Tier,
    /// Tenant-supplied provider keys keyed by provider name
    /// (`openai`, `anthropic`, ...). Values may be `enc:`-prefixed ciphertext.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    /// Tenant key for the aggregation provider, if any.
    #[serde(default)]
    pub aggregator_key: Option<String>,
}

impl TenantConfig {
    /// Configuration used when a thread references an unknown tenant.
    pub fn anonymous(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tier: Tier::Free,
            credentials: HashMap::new(),
            aggregator_key: None,
        }
    }
}

/// Caller identity as resolved by the auth collaborator.
///
/// Exactly one of `member` / `guest` is populated for an authenticated
/// request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub member: Option<String>,
    pub guest: Option<String>,
}

impl Identity {
    pub fn member(id: impl Into<String>) -> Self {
        Self { member: Some(id.into()), guest: None }
    }

    pub fn guest(id: impl Into<String>) -> Self {
        Self { member: None, guest: Some(id.into()) }
    }

    /// The id used for ownership checks and notification fan-out.
    pub fn principal(&self) -> Option<&str> {
        self.member.as_deref().or(self.guest.as_deref())
    }

    pub fn is_anonymous(&self) -> bool {
        self.principal().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_takes_precedence_as_principal() {
        let id = Identity { member: Some("m1".into()), guest: Some("g1".into()) };
        assert_eq!(id.principal(), Some("m1"));
        assert!(Identity::default().is_anonymous());
        assert_eq!(Identity::guest("g2").principal(), Some("g2"));
    }

    #[test]
    fn tenant_tier_defaults_to_free() {
        let t: TenantConfig = serde_json::from_str(r#"{"tenant_id":"acme"}"#).unwrap();
        assert_eq!(t.tier, Tier::Free);
        assert!(t.credentials.is_empty());
    }
}
