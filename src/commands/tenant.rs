use anyhow::Result;

use crate::commands::CommandReport;
use crate::intake::model::{RetentionPolicy, Tenant};
use crate::intake::runtime::Runtime;
use crate::intake::store::NewTenant;

#[derive(Debug, Clone, Default)]
pub struct TenantAddOptions {
    pub name: String,
    pub alias: Option<String>,
    pub is_default: bool,
    pub retention: RetentionPolicy,
}

fn describe(report: &mut CommandReport, tenant: &Tenant) {
    report.detail(format!(
        "tenant id={} name={} alias={} default={}",
        tenant.id,
        tenant.name,
        tenant.alias.as_deref().unwrap_or("-"),
        tenant.is_default,
    ));
    report.detail(format!(
        "  retention.message_days={} retention.document_days={} retention.dossier_closed_days={}",
        opt(tenant.retention.message_days),
        opt(tenant.retention.document_days),
        opt(tenant.retention.dossier_closed_days),
    ));
}

fn opt(value: Option<u64>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "inherit".into())
}

pub fn add(opts: &TenantAddOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("tenant-add");
    if opts.name.trim().is_empty() {
        report.issue("tenant name cannot be empty");
        return Ok(report);
    }
    let policy = opts.retention;
    if [
        policy.message_days,
        policy.document_days,
        policy.dossier_closed_days,
    ]
    .contains(&Some(0))
    {
        report.issue("retention days must be >= 1");
        return Ok(report);
    }

    let rt = Runtime::open()?;
    let created = rt.store.transaction(|tx| {
        tx.insert_tenant(NewTenant {
            name: opts.name.trim().to_string(),
            alias: opts.alias.clone(),
            is_default: opts.is_default,
            retention: policy,
        })
    });
    match created {
        Ok(tenant) => {
            tracing::info!(tenant_id = tenant.id, "tenant created");
            describe(&mut report, &tenant);
        }
        Err(err) => report.refuse(err)?,
    }
    Ok(report)
}

pub fn list() -> Result<CommandReport> {
    let mut report = CommandReport::new("tenant-list");
    let rt = Runtime::open()?;
    let tenants = rt.store.transaction(|tx| Ok(tx.tenants()))?;
    report.detail(format!("tenants={}", tenants.len()));
    for tenant in &tenants {
        describe(&mut report, tenant);
    }
    Ok(report)
}
