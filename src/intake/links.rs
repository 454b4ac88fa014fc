//! Idempotent message and document links, followed by checklist recompute.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::checklist;
use crate::intake::model::{
    Checklist, DocCategory, DocumentLink, Dossier, DossierStatus, LinkQuality,
};
use crate::intake::store::{Store, Tx};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub added: Vec<DocCategory>,
    /// Categories already held by the dossier; the first document is kept.
    pub duplicates: Vec<DocCategory>,
    /// Documents left unlinked because the dossier is finalized.
    pub frozen: Vec<u64>,
    pub checklist: Checklist,
    pub status: DossierStatus,
}

pub fn conflict_flag(category: DocCategory) -> String {
    format!("conflicting_document:{category}")
}

/// Returns false when the pair already existed.
pub fn link_message(tx: &mut Tx<'_>, dossier_id: u64, message_id: u64) -> IntakeResult<bool> {
    if tx.has_message_link(dossier_id, message_id) {
        return Ok(false);
    }
    tx.insert_message_link(dossier_id, message_id)?;
    Ok(true)
}

pub fn link_documents(
    tx: &mut Tx<'_>,
    dossier_id: u64,
    document_ids: &[u64],
) -> IntakeResult<LinkOutcome> {
    let current = tx.dossier(dossier_id)?;
    if current.status.is_terminal() {
        if !document_ids.is_empty() {
            tracing::info!(
                dossier_id,
                status = current.status.as_str(),
                documents = document_ids.len(),
                "dossier finalized; documents left unlinked"
            );
        }
        return Ok(LinkOutcome {
            added: Vec::new(),
            duplicates: Vec::new(),
            frozen: document_ids.to_vec(),
            checklist: current.checklist,
            status: current.status,
        });
    }

    let mut added = Vec::new();
    let mut duplicates = Vec::new();
    let mut flags = Vec::new();

    for &document_id in document_ids {
        let document = tx.document(document_id)?;
        let existing = tx.document_links_for(dossier_id);
        let same_category = existing.iter().find(|l| l.category == document.category);
        if let Some(held) = same_category {
            if held.document_id != document_id {
                tracing::info!(
                    dossier_id,
                    document_id,
                    kept = held.document_id,
                    category = document.category.as_str(),
                    "second document for category ignored"
                );
                flags.push(conflict_flag(document.category));
            }
            if !duplicates.contains(&document.category) {
                duplicates.push(document.category);
            }
            continue;
        }
        if existing.iter().any(|l| l.document_id == document_id) {
            continue;
        }
        let quality = if document.is_heuristic() {
            LinkQuality::NeedsReview
        } else {
            LinkQuality::Classified
        };
        tx.insert_document_link(DocumentLink {
            dossier_id,
            document_id,
            category: document.category,
            quality,
            linked_at: tx.now(),
        })?;
        added.push(document.category);
    }

    if !flags.is_empty() {
        let mut dossier = tx.dossier(dossier_id)?;
        let before = dossier.risk_flags.len();
        for flag in flags {
            if !dossier.risk_flags.contains(&flag) {
                dossier.risk_flags.push(flag);
            }
        }
        if dossier.risk_flags.len() != before {
            tx.update_dossier(dossier)?;
        }
    }

    let dossier = checklist::recompute(tx, dossier_id)?;
    Ok(LinkOutcome {
        added,
        duplicates,
        frozen: Vec::new(),
        checklist: dossier.checklist,
        status: dossier.status,
    })
}

/// Remove one document from a dossier and recompute. Finalized dossiers are
/// frozen.
pub fn unlink_document(store: &Store, dossier_id: u64, document_id: u64) -> IntakeResult<Dossier> {
    store.transaction(|tx| {
        let dossier = tx.dossier(dossier_id)?;
        if dossier.status.is_terminal() {
            return Err(IntakeError::DossierFinalized(dossier_id));
        }
        if !tx.delete_document_link(dossier_id, document_id) {
            return Err(IntakeError::not_found(
                "document link",
                format!("{dossier_id}/{document_id}"),
            ));
        }
        checklist::recompute(tx, dossier_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::dossier::resolve_in;
    use crate::intake::model::ExtractedFields;
    use crate::intake::store::NewDocument;
    use crate::intake::testkit::{Fixture, fixture};
    use tempfile::tempdir;

    fn doc(tx: &mut Tx<'_>, tenant_id: u64, fp: &str, category: DocCategory, by: &str) -> u64 {
        tx.insert_document(NewDocument {
            tenant_id,
            fingerprint: fp.into(),
            storage_ref: format!("{tenant_id}/{fp}-1.bin"),
            filename: format!("{fp}.pdf"),
            mime: "application/pdf".into(),
            category,
            raw_label: category.as_str().to_lowercase(),
            classified_by: by.into(),
            fields: ExtractedFields::default(),
        })
        .expect("doc")
        .id
    }

    fn dossier(fx: &Fixture) -> u64 {
        fx.store
            .transaction(|tx| resolve_in(tx, fx.acme, "jane@x.com", None))
            .expect("resolve")
            .expect("dossier")
            .id
    }

    #[test]
    fn message_link_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let d = dossier(&fx);
        let (first, second) = fx
            .store
            .transaction(|tx| Ok((link_message(tx, d, 9)?, link_message(tx, d, 9)?)))
            .expect("tx");
        assert!(first);
        assert!(!second);
    }

    #[test]
    fn second_document_of_a_category_is_reported_not_linked() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let d = dossier(&fx);
        let outcome = fx
            .store
            .transaction(|tx| {
                let first = doc(tx, fx.acme, "p1", DocCategory::Payslip, "gemini");
                let second = doc(tx, fx.acme, "p2", DocCategory::Payslip, "gemini");
                link_documents(tx, d, &[first])?;
                link_documents(tx, d, &[second])
            })
            .expect("tx");
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.duplicates, vec![DocCategory::Payslip]);
        assert_eq!(outcome.status, DossierStatus::Incomplete);

        let (links, flags) = fx
            .store
            .transaction(|tx| Ok((tx.document_links_for(d), tx.dossier(d)?.risk_flags)))
            .expect("read");
        assert_eq!(links.len(), 1);
        assert_eq!(flags, vec![conflict_flag(DocCategory::Payslip)]);
    }

    #[test]
    fn relinking_the_same_document_is_a_duplicate_without_a_risk_flag() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let d = dossier(&fx);
        let outcome = fx
            .store
            .transaction(|tx| {
                let p = doc(tx, fx.acme, "p1", DocCategory::Payslip, "gemini");
                link_documents(tx, d, &[p])?;
                link_documents(tx, d, &[p, p])
            })
            .expect("tx");
        assert_eq!(outcome.duplicates, vec![DocCategory::Payslip]);
        let flags = fx
            .store
            .transaction(|tx| Ok(tx.dossier(d)?.risk_flags))
            .expect("read");
        assert!(flags.is_empty());
    }

    #[test]
    fn full_set_reaches_to_validate_and_unlink_reopens_missing() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let d = dossier(&fx);
        let (outcome, payslip) = fx
            .store
            .transaction(|tx| {
                let i = doc(tx, fx.acme, "i", DocCategory::Identity, "gemini");
                let p = doc(tx, fx.acme, "p", DocCategory::Payslip, "heuristic");
                let t = doc(tx, fx.acme, "t", DocCategory::TaxNotice, "gemini");
                Ok((link_documents(tx, d, &[i, p, t])?, p))
            })
            .expect("tx");
        assert!(outcome.checklist.missing.is_empty());
        assert_eq!(outcome.status, DossierStatus::ToValidate);

        let links = fx.store.transaction(|tx| Ok(tx.document_links_for(d))).expect("links");
        let heuristic = links.iter().find(|l| l.document_id == payslip).expect("link");
        assert_eq!(heuristic.quality, LinkQuality::NeedsReview);

        let after = unlink_document(&fx.store, d, payslip).expect("unlink");
        assert_eq!(after.checklist.missing, vec![DocCategory::Payslip]);
        assert_eq!(after.status, DossierStatus::Incomplete);
    }

    #[test]
    fn unlinking_the_last_document_resets_to_new() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let d = dossier(&fx);
        let p = fx
            .store
            .transaction(|tx| {
                let p = doc(tx, fx.acme, "p", DocCategory::Payslip, "gemini");
                link_documents(tx, d, &[p])?;
                Ok(p)
            })
            .expect("tx");
        let after = unlink_document(&fx.store, d, p).expect("unlink");
        assert_eq!(after.status, DossierStatus::New);
        assert!(after.checklist.is_cleared());
    }

    fn finalized(fx: &Fixture) -> (u64, u64) {
        let d = dossier(fx);
        let p = fx
            .store
            .transaction(|tx| {
                let i = doc(tx, fx.acme, "i", DocCategory::Identity, "gemini");
                let p = doc(tx, fx.acme, "p", DocCategory::Payslip, "gemini");
                let t = doc(tx, fx.acme, "t", DocCategory::TaxNotice, "gemini");
                link_documents(tx, d, &[i, p, t])?;
                Ok(p)
            })
            .expect("tx");
        crate::intake::dossier::validate(&fx.store, d).expect("validate");
        (d, p)
    }

    #[test]
    fn finalized_dossier_refuses_unlink() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let (d, p) = finalized(&fx);
        assert!(matches!(
            unlink_document(&fx.store, d, p),
            Err(IntakeError::DossierFinalized(_))
        ));
    }

    #[test]
    fn finalized_dossier_reports_new_documents_without_linking() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let (d, _) = finalized(&fx);
        let (bank, outcome) = fx
            .store
            .transaction(|tx| {
                let bank = doc(tx, fx.acme, "b", DocCategory::BankStatement, "gemini");
                Ok((bank, link_documents(tx, d, &[bank])?))
            })
            .expect("tx");
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.frozen, vec![bank]);
        assert_eq!(outcome.status, DossierStatus::Validated);

        let links = fx.store.transaction(|tx| Ok(tx.document_links_for(d))).expect("links");
        assert_eq!(links.len(), 3);
        assert!(links.iter().all(|l| l.document_id != bank));
    }
}
