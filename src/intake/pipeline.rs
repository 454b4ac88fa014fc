//! One inbound message end to end: prefilter, routing, attachments, message
//! classification, then message insert + dossier resolve + links + checklist
//! in a single transaction.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::classifier::{Classifier, MessageVerdict, fallback_message_verdict, with_timeout};
use crate::intake::config::IntakeConfig;
use crate::intake::content_store::ContentStore;
use crate::intake::dossier::{display_name_of, normalize_email, resolve_in};
use crate::intake::ingest::{AttachmentIngestor, AttachmentPayload, SkippedAttachment};
use crate::intake::links::{link_documents, link_message};
use crate::intake::model::{DocCategory, DossierStatus};
use crate::intake::prefilter::{self, FilterDecision, InboundView};
use crate::intake::reply::{Mailer, ReplyContext, compose_reply};
use crate::intake::router::TenantRouter;
use crate::intake::store::{NewMessage, Store};
use crate::intake::warn::{self, WarnEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Raw recipient address; carries the routing alias.
    #[serde(alias = "to_email", alias = "recipient")]
    pub tenant_hint: String,
    #[serde(alias = "from_email")]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "content")]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    pub dossier_id: Option<u64>,
    pub added_categories: Vec<DocCategory>,
    pub duplicate_categories: Vec<DocCategory>,
    pub missing_categories: Vec<DocCategory>,
    pub dossier_status: DossierStatus,
    pub tenant_id: u64,
    pub message_id: Option<u64>,
    pub document_ids: Vec<u64>,
    /// Documents stored but not linked because the dossier is finalized.
    #[serde(default)]
    pub frozen_document_ids: Vec<u64>,
    pub skipped_attachments: Vec<SkippedAttachment>,
    pub filter_decision: FilterDecision,
    pub filter_score: i32,
    pub filter_reasons: Vec<String>,
    pub reply_sent: bool,
    pub classifier_degraded: bool,
}

struct Committed {
    message_id: u64,
    dossier_id: Option<u64>,
    added: Vec<DocCategory>,
    duplicates: Vec<DocCategory>,
    frozen: Vec<u64>,
    missing: Vec<DocCategory>,
    status: DossierStatus,
}

pub struct Intake {
    store: Arc<Store>,
    classifier: Arc<dyn Classifier>,
    router: TenantRouter,
    ingestor: AttachmentIngestor,
    mailer: Arc<dyn Mailer>,
    cfg: IntakeConfig,
}

impl Intake {
    /// Fails with [`IntakeError::NoTenantConfigured`] when no tenant exists.
    pub fn new(
        store: Arc<Store>,
        content: Arc<ContentStore>,
        classifier: Arc<dyn Classifier>,
        mailer: Arc<dyn Mailer>,
        cfg: IntakeConfig,
    ) -> IntakeResult<Self> {
        let router = TenantRouter::new(store.clone(), &cfg.routing)?;
        let ingestor = AttachmentIngestor::new(
            store.clone(),
            content,
            classifier.clone(),
            cfg.limits.clone(),
            Duration::from_secs(cfg.classifier.timeout_secs),
        );
        Ok(Self {
            store,
            classifier,
            router,
            ingestor,
            mailer,
            cfg,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn ingest(&self, msg: &InboundMessage) -> IntakeResult<IngestResult> {
        let verdict = prefilter::evaluate(
            &self.cfg.prefilter,
            &InboundView {
                headers: &msg.headers,
                sender: &msg.sender,
                subject: &msg.subject,
                body: &msg.body,
                attachment_count: msg.attachments.len(),
            },
        );
        let tenant = self.router.route(&msg.tenant_hint)?;

        let mut result = IngestResult {
            dossier_id: None,
            added_categories: Vec::new(),
            duplicate_categories: Vec::new(),
            missing_categories: Vec::new(),
            dossier_status: DossierStatus::New,
            tenant_id: tenant.id,
            message_id: None,
            document_ids: Vec::new(),
            frozen_document_ids: Vec::new(),
            skipped_attachments: Vec::new(),
            filter_decision: verdict.decision,
            filter_score: verdict.score,
            filter_reasons: verdict.reasons,
            reply_sent: false,
            classifier_degraded: false,
        };
        if verdict.decision == FilterDecision::Ignore {
            tracing::info!(
                tenant_id = tenant.id,
                reasons = ?result.filter_reasons,
                "inbound message ignored by prefilter"
            );
            return Ok(result);
        }

        // Attachments first: their summaries feed message classification.
        let attachments = self.ingestor.ingest(tenant.id, &msg.attachments);
        let (message_verdict, message_degraded) =
            self.classify_message(tenant.id, msg, &attachments.context());
        result.document_ids = attachments.document_ids.clone();
        result.skipped_attachments = attachments.skipped.clone();
        result.classifier_degraded = attachments.degraded || message_degraded;

        let committed = self.commit(tenant.id, msg, &message_verdict, &attachments.document_ids)?;
        result.message_id = Some(committed.message_id);
        result.dossier_id = committed.dossier_id;
        result.added_categories = committed.added;
        result.duplicate_categories = committed.duplicates;
        result.frozen_document_ids = committed.frozen;
        result.missing_categories = committed.missing;
        result.dossier_status = committed.status;

        if verdict.decision == FilterDecision::ProcessFull && self.cfg.reply.auto_send {
            result.reply_sent = self.send_reply(msg, &result);
        }

        tracing::info!(
            tenant_id = tenant.id,
            message_id = committed.message_id,
            dossier_id = ?result.dossier_id,
            status = result.dossier_status.as_str(),
            added = result.added_categories.len(),
            duplicates = result.duplicate_categories.len(),
            frozen = result.frozen_document_ids.len(),
            "inbound message ingested"
        );
        Ok(result)
    }

    fn classify_message(
        &self,
        tenant_id: u64,
        msg: &InboundMessage,
        context: &str,
    ) -> (MessageVerdict, bool) {
        let classifier = Arc::clone(&self.classifier);
        let (subject, body, context) = (msg.subject.clone(), msg.body.clone(), context.to_string());
        let timeout = Duration::from_secs(self.cfg.classifier.timeout_secs);
        match with_timeout(timeout, move || {
            classifier.classify_message(&subject, &body, &context)
        }) {
            Ok(verdict) => (verdict, false),
            Err(err) => {
                warn::emit(&WarnEvent {
                    code: err.code(),
                    stage: "classify_message",
                    action: "fallback_generic",
                    tenant: &tenant_id.to_string(),
                    subject: &msg.subject,
                    retry: "no",
                    reason: "message classifier failed; using generic summary",
                    err: &err.to_string(),
                });
                (fallback_message_verdict(&msg.body), true)
            }
        }
    }

    /// Runs the write transaction, retrying once when the dossier
    /// find-or-create loses a race.
    fn commit(
        &self,
        tenant_id: u64,
        msg: &InboundMessage,
        verdict: &MessageVerdict,
        document_ids: &[u64],
    ) -> IntakeResult<Committed> {
        let attempt = || {
            self.store.transaction(|tx| {
                let message = tx.insert_message(NewMessage {
                    tenant_id,
                    sender: msg.sender.trim().to_string(),
                    subject: msg.subject.clone(),
                    body: msg.body.clone(),
                    category: verdict.category.clone(),
                    urgency: verdict.urgency.clone(),
                    summary: verdict.summary.clone(),
                    suggested_title: verdict.suggested_title.clone(),
                })?;
                let display_name = display_name_of(&msg.sender);
                let Some(dossier) =
                    resolve_in(tx, tenant_id, &msg.sender, display_name.as_deref())?
                else {
                    return Ok(Committed {
                        message_id: message.id,
                        dossier_id: None,
                        added: Vec::new(),
                        duplicates: Vec::new(),
                        frozen: Vec::new(),
                        missing: Vec::new(),
                        status: DossierStatus::New,
                    });
                };
                link_message(tx, dossier.id, message.id)?;
                let outcome = link_documents(tx, dossier.id, document_ids)?;
                Ok(Committed {
                    message_id: message.id,
                    dossier_id: Some(dossier.id),
                    added: outcome.added,
                    duplicates: outcome.duplicates,
                    frozen: outcome.frozen,
                    missing: outcome.checklist.missing,
                    status: outcome.status,
                })
            })
        };
        match attempt() {
            Err(IntakeError::Conflict(_) | IntakeError::DossierRaceLost { .. }) => {
                tracing::debug!(tenant_id, "dossier race lost; retrying once");
                attempt().map_err(|err| match err {
                    IntakeError::Conflict(_) => IntakeError::DossierRaceLost { tenant_id },
                    other => other,
                })
            }
            other => other,
        }
    }

    fn send_reply(&self, msg: &InboundMessage, result: &IngestResult) -> bool {
        let (Some(to), Some(message_id)) = (normalize_email(&msg.sender), result.message_id) else {
            return false;
        };
        if result.dossier_id.is_none() {
            return false;
        }
        let display_name = display_name_of(&msg.sender);
        let (subject, body) = compose_reply(&ReplyContext {
            display_name: display_name.as_deref(),
            original_subject: &msg.subject,
            added: &result.added_categories,
            duplicates: &result.duplicate_categories,
            missing: &result.missing_categories,
            status: result.dossier_status,
        });
        let sent = self
            .mailer
            .send(&to, &subject, &body)
            .and_then(|()| self.store.transaction(|tx| tx.mark_reply_sent(message_id)));
        match sent {
            Ok(()) => true,
            Err(err) => {
                warn::emit(&WarnEvent {
                    code: err.code(),
                    stage: "reply",
                    action: "skip",
                    tenant: &result.tenant_id.to_string(),
                    subject: &msg.subject,
                    retry: "no",
                    reason: "reply delivery failed",
                    err: &err.to_string(),
                });
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::reply::OutboxMailer;
    use crate::intake::testkit::{EchoClassifier, FailingClassifier, Fixture, b64, fixture};
    use tempfile::tempdir;

    fn intake(
        fx: &Fixture,
        root: &std::path::Path,
        classifier: Arc<dyn Classifier>,
        auto_send: bool,
    ) -> Intake {
        let mut cfg = IntakeConfig::default();
        cfg.reply.auto_send = auto_send;
        Intake::new(
            fx.store.clone(),
            fx.content.clone(),
            classifier,
            Arc::new(OutboxMailer::new(root.join("outbox"), "intake@agency.test")),
            cfg,
        )
        .expect("intake")
    }

    fn message(attachments: &[(&str, &[u8])]) -> InboundMessage {
        InboundMessage {
            tenant_hint: "intake+acme@domain.test".into(),
            sender: "Jane Doe <jane@x.com>".into(),
            subject: "My rental application".into(),
            body: "Please find my documents attached for the apartment.".into(),
            attachments: attachments
                .iter()
                .map(|(name, bytes)| AttachmentPayload {
                    filename: name.to_string(),
                    content_base64: b64(bytes),
                    declared_mime: "application/pdf".into(),
                })
                .collect(),
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn acme_scenario_end_to_end() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(EchoClassifier), false);

        let first = intake
            .ingest(&message(&[("payslip.pdf", b"payslip-bytes")]))
            .expect("first");
        assert_eq!(first.tenant_id, fx.acme);
        assert_eq!(first.dossier_status, DossierStatus::Incomplete);
        assert_eq!(first.added_categories, vec![DocCategory::Payslip]);
        assert_eq!(
            first.missing_categories,
            vec![DocCategory::Identity, DocCategory::TaxNotice]
        );

        let second = intake
            .ingest(&message(&[
                ("passport.pdf", b"identity-bytes"),
                ("tax_notice.pdf", b"tax-bytes"),
            ]))
            .expect("second");
        assert_eq!(second.dossier_id, first.dossier_id);
        assert!(second.missing_categories.is_empty());
        assert_eq!(second.dossier_status, DossierStatus::ToValidate);

        let third = intake
            .ingest(&message(&[("payslip-again.pdf", b"payslip-bytes")]))
            .expect("third");
        assert_eq!(third.dossier_id, first.dossier_id);
        assert_eq!(third.duplicate_categories, vec![DocCategory::Payslip]);
        assert!(third.added_categories.is_empty());
        assert_eq!(third.dossier_status, DossierStatus::ToValidate);
    }

    #[test]
    fn classifier_outage_degrades_but_still_ingests() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(FailingClassifier), false);
        let result = intake
            .ingest(&message(&[("fiche_de_paie.pdf", b"bytes")]))
            .expect("ingest");
        assert!(result.classifier_degraded);
        assert_eq!(result.added_categories, vec![DocCategory::Payslip]);
        let stored = intake
            .store()
            .transaction(|tx| tx.message(result.message_id.expect("message")))
            .expect("message");
        assert_eq!(stored.category, "other");
        assert_eq!(stored.urgency, "medium");
    }

    #[test]
    fn ignored_message_persists_nothing() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(EchoClassifier), false);
        let mut spam = message(&[]);
        spam.subject = "Huge promo".into();
        spam.body = "Buy now".into();
        let result = intake.ingest(&spam).expect("ingest");
        assert_eq!(result.filter_decision, FilterDecision::Ignore);
        assert_eq!(result.dossier_id, None);
        assert_eq!(result.message_id, None);
        assert_eq!(result.dossier_status, DossierStatus::New);
        let dossiers = fx
            .store
            .transaction(|tx| Ok(tx.dossiers_for_tenant(fx.acme).len()))
            .expect("count");
        assert_eq!(dossiers, 0);
    }

    #[test]
    fn auto_reply_goes_to_the_outbox_and_flags_the_message() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(EchoClassifier), true);
        let result = intake
            .ingest(&message(&[("payslip.pdf", b"p")]))
            .expect("ingest");
        assert!(result.reply_sent);
        let flagged = fx
            .store
            .transaction(|tx| Ok(tx.message(result.message_id.expect("id"))?.reply_sent))
            .expect("read");
        assert!(flagged);
        let files = std::fs::read_dir(tmp.path().join("outbox")).expect("outbox").count();
        assert_eq!(files, 1);
    }

    #[test]
    fn concurrent_messages_from_one_sender_share_a_dossier() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(EchoClassifier), false);
        let docs: [(&str, &[u8]); 3] = [
            ("passport.pdf", b"i"),
            ("payslip.pdf", b"p"),
            ("tax_notice.pdf", b"t"),
        ];
        let ids: Vec<Option<u64>> = std::thread::scope(|scope| {
            let handles: Vec<_> = docs
                .iter()
                .map(|doc| {
                    let intake = &intake;
                    scope.spawn(move || {
                        intake.ingest(&message(&[*doc])).expect("ingest").dossier_id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("join")).collect()
        });
        assert!(ids.iter().all(|id| id.is_some() && *id == ids[0]));
        let dossier = fx
            .store
            .transaction(|tx| tx.dossier(ids[0].expect("id")))
            .expect("dossier");
        assert_eq!(dossier.status, DossierStatus::ToValidate);
    }

    #[test]
    fn message_without_sender_email_has_no_dossier() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(EchoClassifier), false);
        let mut anonymous = message(&[("payslip.pdf", b"p")]);
        anonymous.sender = "  ".into();
        let result = intake.ingest(&anonymous).expect("ingest");
        assert!(result.message_id.is_some());
        assert_eq!(result.dossier_id, None);
        assert_eq!(result.document_ids.len(), 1);
    }

    #[test]
    fn documents_sent_after_validation_are_stored_but_not_linked() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let intake = intake(&fx, tmp.path(), Arc::new(EchoClassifier), false);
        let full = intake
            .ingest(&message(&[
                ("passport.pdf", b"i"),
                ("payslip.pdf", b"p"),
                ("tax_notice.pdf", b"t"),
            ]))
            .expect("full");
        let dossier_id = full.dossier_id.expect("dossier");
        crate::intake::dossier::validate(&fx.store, dossier_id).expect("validate");

        let late = intake
            .ingest(&message(&[("bank_statement.pdf", b"b")]))
            .expect("late");
        assert_eq!(late.dossier_id, Some(dossier_id));
        assert_eq!(late.dossier_status, DossierStatus::Validated);
        assert!(late.added_categories.is_empty());
        assert_eq!(late.frozen_document_ids, late.document_ids);
        assert_eq!(late.frozen_document_ids.len(), 1);
        let links = fx
            .store
            .transaction(|tx| Ok(tx.document_links_for(dossier_id).len()))
            .expect("links");
        assert_eq!(links, 3);
    }
}
