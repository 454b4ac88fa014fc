//! Periodic purge of expired messages and documents, and anonymization of
//! dossiers closed past their window. One transaction per tenant.

use crate::error::IntakeResult;
use crate::intake::checklist;
use crate::intake::config::RetentionConfig;
use crate::intake::content_store::ContentStore;
use crate::intake::model::Tenant;
use crate::intake::store::Store;
use crate::intake::util::{days_to_secs, now_epoch_secs};
use crate::intake::warn::{self, WarnEvent};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepOutcome {
    pub tenants_swept: usize,
    pub tenants_failed: Vec<String>,
    pub messages_deleted: usize,
    pub documents_deleted: usize,
    pub blobs_removed: usize,
    pub dossiers_recomputed: usize,
    pub dossiers_anonymized: usize,
    pub staging_removed: usize,
}

impl SweepOutcome {
    pub fn is_clean(&self) -> bool {
        self.tenants_failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct TenantSweep {
    messages_deleted: usize,
    documents_deleted: usize,
    dossiers_recomputed: usize,
    dossiers_anonymized: usize,
    blob_refs: Vec<String>,
}

pub struct RetentionSweeper {
    store: Arc<Store>,
    content: Arc<ContentStore>,
    cfg: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<Store>, content: Arc<ContentStore>, cfg: RetentionConfig) -> Self {
        Self {
            store,
            content,
            cfg,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.cfg.sweep_interval_secs)
    }

    pub fn sweep_once(&self, now: u64) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        let tenants = match self.store.transaction(|tx| Ok(tx.tenants())) {
            Ok(tenants) => tenants,
            Err(err) => {
                self.warn_failure("all", "list_tenants", &err.to_string(), err.code());
                outcome.tenants_failed.push(format!("*: {err}"));
                Vec::new()
            }
        };

        for tenant in &tenants {
            match self.sweep_tenant(tenant, now) {
                Ok(swept) => {
                    outcome.tenants_swept += 1;
                    outcome.messages_deleted += swept.messages_deleted;
                    outcome.documents_deleted += swept.documents_deleted;
                    outcome.dossiers_recomputed += swept.dossiers_recomputed;
                    outcome.dossiers_anonymized += swept.dossiers_anonymized;
                    for reference in &swept.blob_refs {
                        match self.content.remove(reference) {
                            Ok(true) => outcome.blobs_removed += 1,
                            Ok(false) => {}
                            Err(err) => self.warn_failure(
                                &tenant.id.to_string(),
                                "remove_blob",
                                &err.to_string(),
                                err.code(),
                            ),
                        }
                    }
                }
                Err(err) => {
                    self.warn_failure(
                        &tenant.id.to_string(),
                        "sweep_tenant",
                        &err.to_string(),
                        err.code(),
                    );
                    outcome.tenants_failed.push(format!("{}: {err}", tenant.id));
                }
            }
        }

        match self
            .content
            .sweep_staging(self.cfg.staging_max_age_secs, now)
        {
            Ok(removed) => outcome.staging_removed = removed,
            Err(err) => self.warn_failure("all", "sweep_staging", &err.to_string(), err.code()),
        }

        tracing::info!(
            tenants = outcome.tenants_swept,
            failed = outcome.tenants_failed.len(),
            messages = outcome.messages_deleted,
            documents = outcome.documents_deleted,
            anonymized = outcome.dossiers_anonymized,
            "retention sweep finished"
        );
        outcome
    }

    fn sweep_tenant(&self, tenant: &Tenant, now: u64) -> IntakeResult<TenantSweep> {
        let policy = tenant.retention.resolve(&self.cfg);
        let message_cutoff = now.saturating_sub(days_to_secs(policy.message_days));
        let document_cutoff = now.saturating_sub(days_to_secs(policy.document_days));
        let closed_cutoff = now.saturating_sub(days_to_secs(policy.dossier_closed_days));
        let tenant_id = tenant.id;

        self.store.transaction(|tx| {
            let mut swept = TenantSweep::default();

            for message_id in tx.messages_created_before(tenant_id, message_cutoff) {
                tx.delete_message(message_id)?;
                swept.messages_deleted += 1;
            }

            let mut touched = BTreeSet::new();
            for document_id in tx.documents_created_before(tenant_id, document_cutoff) {
                let (document, dossiers) = tx.delete_document(document_id)?;
                touched.extend(dossiers);
                if let Some(blob) = tx.delete_blob(tenant_id, &document.fingerprint) {
                    swept.blob_refs.push(blob.storage_ref);
                }
                swept.documents_deleted += 1;
            }
            for dossier_id in touched {
                checklist::recompute(tx, dossier_id)?;
                swept.dossiers_recomputed += 1;
            }

            for mut dossier in tx.dossiers_for_tenant(tenant_id) {
                let expired = dossier
                    .closed_at
                    .is_some_and(|closed| closed < closed_cutoff);
                if !expired || dossier.anonymized_at.is_some() {
                    continue;
                }
                dossier.email = None;
                dossier.display_name = None;
                dossier.risk_flags.clear();
                dossier.anonymized_at = Some(now);
                tx.update_dossier(dossier)?;
                swept.dossiers_anonymized += 1;
            }
            Ok(swept)
        })
    }

    fn warn_failure(&self, tenant: &str, action: &str, reason: &str, code: &str) {
        warn::emit(&WarnEvent {
            code,
            stage: "retention",
            action,
            tenant,
            subject: "sweep",
            retry: "next_interval",
            reason,
            err: code,
        });
    }

    /// Sweep on the configured interval until `stop` is set.
    pub fn run_forever(&self, stop: &AtomicBool) {
        while !stop.load(Ordering::SeqCst) {
            match now_epoch_secs() {
                Ok(now) => {
                    self.sweep_once(now);
                }
                Err(err) => self.warn_failure("all", "clock", &err.to_string(), err.code()),
            }
            let mut waited = Duration::ZERO;
            while waited < self.interval() && !stop.load(Ordering::SeqCst) {
                let step = Duration::from_millis(500).min(self.interval() - waited);
                std::thread::sleep(step);
                waited += step;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::dossier;
    use crate::intake::ingest::{AttachmentIngestor, AttachmentPayload};
    use crate::intake::links::link_documents;
    use crate::intake::model::{DossierStatus, RetentionPolicy};
    use crate::intake::testkit::{EchoClassifier, Fixture, b64, fixture};
    use crate::intake::util::SECS_PER_DAY;
    use tempfile::tempdir;

    fn sweeper(fx: &Fixture) -> RetentionSweeper {
        RetentionSweeper::new(fx.store.clone(), fx.content.clone(), RetentionConfig::default())
    }

    fn ingest_payslip(fx: &Fixture, tenant: u64) -> (u64, u64) {
        let ing = AttachmentIngestor::new(
            fx.store.clone(),
            fx.content.clone(),
            Arc::new(EchoClassifier),
            Default::default(),
            Duration::from_secs(5),
        );
        let out = ing.ingest(
            tenant,
            &[AttachmentPayload {
                filename: "payslip.pdf".into(),
                content_base64: b64(format!("payslip-{tenant}").as_bytes()),
                declared_mime: "application/pdf".into(),
            }],
        );
        let document_id = out.document_ids[0];
        let dossier_id = fx
            .store
            .transaction(|tx| {
                let d = dossier::resolve_in(tx, tenant, "jane@x.com", Some("Jane"))?
                    .expect("dossier");
                link_documents(tx, d.id, &[document_id])?;
                Ok(d.id)
            })
            .expect("link");
        (dossier_id, document_id)
    }

    #[test]
    fn expired_documents_go_with_their_blob_and_reset_the_checklist() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let (dossier_id, document_id) = ingest_payslip(&fx, fx.acme);
        let reference = fx
            .store
            .transaction(|tx| Ok(tx.document(document_id)?.storage_ref))
            .expect("ref");

        let later = now_epoch_secs().expect("now") + 400 * SECS_PER_DAY;
        let outcome = sweeper(&fx).sweep_once(later);
        assert!(outcome.is_clean());
        assert_eq!(outcome.documents_deleted, 1);
        assert_eq!(outcome.blobs_removed, 1);
        assert!(fx.content.get(&reference).is_err());

        let dossier = fx.store.transaction(|tx| tx.dossier(dossier_id)).expect("dossier");
        assert_eq!(dossier.status, DossierStatus::New);
        assert!(dossier.checklist.is_cleared());
    }

    #[test]
    fn fresh_data_survives_a_sweep() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let (_, document_id) = ingest_payslip(&fx, fx.acme);
        let outcome = sweeper(&fx).sweep_once(now_epoch_secs().expect("now"));
        assert_eq!(outcome.documents_deleted, 0);
        assert!(fx.store.transaction(|tx| tx.document(document_id)).is_ok());
    }

    #[test]
    fn closed_dossier_is_anonymized_only_after_its_window() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let (old, _) = ingest_payslip(&fx, fx.acme);
        let (recent, _) = ingest_payslip(&fx, fx.globex);
        let now = now_epoch_secs().expect("now");
        fx.store
            .transaction(|tx| {
                let tables = tx.tables_mut();
                if let Some(d) = tables.dossiers.get_mut(&old) {
                    d.closed_at = Some(now - 100 * SECS_PER_DAY);
                    d.risk_flags.push("conflicting_document:PAYSLIP".into());
                }
                if let Some(d) = tables.dossiers.get_mut(&recent) {
                    d.closed_at = Some(now - 10 * SECS_PER_DAY);
                }
                Ok(())
            })
            .expect("close");

        let outcome = sweeper(&fx).sweep_once(now);
        assert_eq!(outcome.dossiers_anonymized, 1);
        let (old, recent) = fx
            .store
            .transaction(|tx| Ok((tx.dossier(old)?, tx.dossier(recent)?)))
            .expect("read");
        assert_eq!(old.email, None);
        assert_eq!(old.display_name, None);
        assert!(old.risk_flags.is_empty());
        assert!(old.anonymized_at.is_some());
        assert_eq!(recent.email.as_deref(), Some("jane@x.com"));
    }

    #[test]
    fn per_tenant_policy_overrides_defaults() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let (_, acme_doc) = ingest_payslip(&fx, fx.acme);
        let (_, globex_doc) = ingest_payslip(&fx, fx.globex);
        fx.store
            .transaction(|tx| {
                if let Some(t) = tx.tables_mut().tenants.get_mut(&fx.acme) {
                    t.retention = RetentionPolicy {
                        document_days: Some(1),
                        ..RetentionPolicy::default()
                    };
                }
                Ok(())
            })
            .expect("policy");

        let in_two_days = now_epoch_secs().expect("now") + 2 * SECS_PER_DAY;
        let outcome = sweeper(&fx).sweep_once(in_two_days);
        assert_eq!(outcome.documents_deleted, 1);
        assert!(fx.store.transaction(|tx| tx.document(acme_doc)).is_err());
        assert!(fx.store.transaction(|tx| tx.document(globex_doc)).is_ok());
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let stop = AtomicBool::new(true);
        sweeper(&fx).run_forever(&stop);
    }
}
