use crate::error::{IntakeError, IntakeResult};
use crate::intake::config::RoutingConfig;
use crate::intake::model::Tenant;
use crate::intake::store::Store;
use std::sync::Arc;

/// `Name <local+alias@domain>` -> `alias`. None when there is no `+` marker.
pub fn extract_alias(recipient: &str) -> Option<String> {
    let addr = match (recipient.rfind('<'), recipient.rfind('>')) {
        (Some(open), Some(close)) if open < close => &recipient[open + 1..close],
        _ => recipient,
    };
    let (local, _domain) = addr.trim().rsplit_once('@')?;
    let (_, alias) = local.split_once('+')?;
    let alias = alias.trim().to_ascii_lowercase();
    (!alias.is_empty()).then_some(alias)
}

pub struct TenantRouter {
    store: Arc<Store>,
    default_alias: Option<String>,
}

impl TenantRouter {
    /// Fails with [`IntakeError::NoTenantConfigured`] when the tenant table is
    /// empty, so a misconfigured deployment stops at startup.
    pub fn new(store: Arc<Store>, routing: &RoutingConfig) -> IntakeResult<Self> {
        let router = Self {
            store,
            default_alias: routing
                .default_tenant
                .as_deref()
                .map(|a| a.trim().to_ascii_lowercase())
                .filter(|a| !a.is_empty()),
        };
        router.store.transaction(|tx| router.default_in(&tx.tenants()))?;
        Ok(router)
    }

    fn default_in(&self, tenants: &[Tenant]) -> IntakeResult<Tenant> {
        if let Some(alias) = self.default_alias.as_deref() {
            if let Some(tenant) = tenants.iter().find(|t| t.alias.as_deref() == Some(alias)) {
                return Ok(tenant.clone());
            }
            tracing::warn!(alias, "configured default tenant alias not found");
        }
        tenants
            .iter()
            .find(|t| t.is_default)
            .or_else(|| tenants.iter().min_by_key(|t| t.id))
            .cloned()
            .ok_or(IntakeError::NoTenantConfigured)
    }

    /// Alias match first, then the designated default tenant.
    pub fn route(&self, recipient: &str) -> IntakeResult<Tenant> {
        let alias = extract_alias(recipient);
        self.store.transaction(|tx| {
            if let Some(tenant) = alias.as_deref().and_then(|a| tx.tenant_by_alias(a)) {
                return Ok(tenant);
            }
            self.default_in(&tx.tenants())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::testkit::fixture;
    use tempfile::tempdir;

    #[test]
    fn alias_is_parsed_from_plus_addresses() {
        assert_eq!(extract_alias("intake+acme@domain.com").as_deref(), Some("acme"));
        assert_eq!(
            extract_alias("Acme Intake <intake+ACME@domain.com>").as_deref(),
            Some("acme")
        );
        assert_eq!(extract_alias("intake@domain.com"), None);
        assert_eq!(extract_alias("intake+@domain.com"), None);
        assert_eq!(extract_alias("not an address"), None);
    }

    #[test]
    fn routes_by_alias_then_falls_back_to_default() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let router =
            TenantRouter::new(fx.store.clone(), &RoutingConfig::default()).expect("router");
        assert_eq!(router.route("intake+acme@x.com").expect("acme").id, fx.acme);
        // Unknown alias and no alias both land on the tenant flagged default.
        assert_eq!(router.route("intake+nobody@x.com").expect("fallback").id, fx.globex);
        assert_eq!(router.route("intake@x.com").expect("fallback").id, fx.globex);
    }

    #[test]
    fn configured_default_alias_overrides_flag() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let routing = RoutingConfig {
            default_tenant: Some("acme".into()),
        };
        let router = TenantRouter::new(fx.store.clone(), &routing).expect("router");
        assert_eq!(router.route("someone@x.com").expect("default").id, fx.acme);
    }

    #[test]
    fn empty_tenant_table_is_a_startup_error() {
        let store = Arc::new(Store::in_memory());
        let err = TenantRouter::new(store, &RoutingConfig::default())
            .err()
            .expect("no tenants");
        assert!(matches!(err, IntakeError::NoTenantConfigured));
    }
}
