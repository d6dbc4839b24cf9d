use std::collections::HashMap;

use cg_domain::tenant::TenantConfig;

/// Static tenant directory loaded from config.
pub struct TenantDirectory {
    tenants: HashMap<String, TenantConfig>,
}

impl TenantDirectory {
    pub fn new(tenants: &[TenantConfig]) -> Self {
        Self {
            tenants: tenants
                .iter()
                .map(|t| (t.tenant_id.clone(), t.clone()))
                .collect(),
        }
    }

    /// Unknown tenants get the free-tier defaults with no keys.
    pub fn get(&self, tenant_id: &str) -> TenantConfig {
        self.tenants
            .get(tenant_id)
            .cloned()
            .unwrap_or_else(|| TenantConfig::anonymous(tenant_id))
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cg_domain::tenant::Tier;

    #[test]
    fn unknown_tenant_falls_back_to_free() {
        let mut paid = TenantConfig::anonymous("acme");
        paid.tier = Tier::Paid;
        let dir = TenantDirectory::new(&[paid]);
        assert_eq!(dir.get("acme").tier, Tier::Paid);
        let other = dir.get("nobody");
        assert_eq!(other.tenant_id, "nobody");
        assert_eq!(other.tier, Tier::Free);
    }
}
