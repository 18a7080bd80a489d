//! Tenant directory backed by configuration.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::TenantConfig;
use crate::interfaces::{CollaboratorError, Entitlements, TenantPlan, TenantResolver};
use crate::model::{CanonicalTenantId, TenantRef};

/// Resolves tenant identifiers and plans from the `tenants` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantDirectory {
    by_public_id: HashMap<String, CanonicalTenantId>,
    plans: HashMap<CanonicalTenantId, TenantPlan>,
}

impl StaticTenantDirectory {
    pub fn from_tenants(tenants: &[TenantConfig]) -> Self {
        let mut directory = Self::default();
        for tenant in tenants {
            let id = CanonicalTenantId(tenant.canonical_id);
            if let Some(public_id) = &tenant.public_id {
                directory.by_public_id.insert(public_id.clone(), id);
            }
            directory.plans.insert(
                id,
                TenantPlan {
                    monthly_event_limit: tenant.monthly_event_limit,
                    aov_major: tenant.aov_major,
                    currency: tenant.currency.clone(),
                },
            );
        }
        directory
    }
}

#[async_trait]
impl TenantResolver for StaticTenantDirectory {
    async fn resolve(
        &self,
        tenant: &TenantRef,
    ) -> Result<Option<CanonicalTenantId>, CollaboratorError> {
        Ok(match tenant {
            TenantRef::Public(slug) => self.by_public_id.get(slug).copied(),
            TenantRef::Canonical(id) => {
                let id = CanonicalTenantId(*id);
                self.plans.contains_key(&id).then_some(id)
            }
        })
    }
}

#[async_trait]
impl Entitlements for StaticTenantDirectory {
    async fn plan(&self, tenant: CanonicalTenantId) -> Result<Option<TenantPlan>, CollaboratorError> {
        Ok(self.plans.get(&tenant).cloned())
    }
}
