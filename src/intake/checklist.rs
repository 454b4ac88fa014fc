use crate::error::IntakeResult;
use crate::intake::model::{Checklist, DocCategory, DocumentLink, Dossier, DossierStatus};
use crate::intake::store::Tx;

/// Required categories in display order.
pub const REQUIRED: [DocCategory; 3] = [
    DocCategory::Identity,
    DocCategory::Payslip,
    DocCategory::TaxNotice,
];

/// Zero links clear the checklist entirely.
pub fn compute(links: &[DocumentLink]) -> Checklist {
    if links.is_empty() {
        return Checklist::default();
    }
    let (received, missing): (Vec<DocCategory>, Vec<DocCategory>) = REQUIRED
        .into_iter()
        .partition(|required| links.iter().any(|l| l.category == *required));
    Checklist {
        required: REQUIRED.to_vec(),
        received,
        missing,
    }
}

pub fn derive_status(
    current: DossierStatus,
    checklist: &Checklist,
    link_count: usize,
) -> DossierStatus {
    if current.is_terminal() {
        return current;
    }
    if link_count == 0 {
        DossierStatus::New
    } else if checklist.missing.is_empty() {
        DossierStatus::ToValidate
    } else {
        DossierStatus::Incomplete
    }
}

/// Rebuild the cached checklist and status from the dossier's links.
pub fn recompute(tx: &mut Tx<'_>, dossier_id: u64) -> IntakeResult<Dossier> {
    let mut dossier = tx.dossier(dossier_id)?;
    let links = tx.document_links_for(dossier_id);
    let checklist = compute(&links);
    let status = derive_status(dossier.status, &checklist, links.len());
    if checklist == dossier.checklist && status == dossier.status {
        return Ok(dossier);
    }
    if status != dossier.status {
        tracing::debug!(
            dossier_id,
            from = dossier.status.as_str(),
            to = status.as_str(),
            "dossier status changed"
        );
    }
    dossier.checklist = checklist;
    dossier.status = status;
    tx.update_dossier(dossier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::model::LinkQuality;

    fn link(category: DocCategory) -> DocumentLink {
        DocumentLink {
            dossier_id: 1,
            document_id: category as u64,
            category,
            quality: LinkQuality::Classified,
            linked_at: 0,
        }
    }

    #[test]
    fn no_links_means_new_and_empty_checklist() {
        let checklist = compute(&[]);
        assert!(checklist.is_cleared());
        assert_eq!(
            derive_status(DossierStatus::Incomplete, &checklist, 0),
            DossierStatus::New
        );
    }

    #[test]
    fn missing_shrinks_as_required_categories_arrive() {
        let one = compute(&[link(DocCategory::Payslip)]);
        assert_eq!(one.missing, vec![DocCategory::Identity, DocCategory::TaxNotice]);
        assert_eq!(derive_status(DossierStatus::New, &one, 1), DossierStatus::Incomplete);

        let all = compute(&[
            link(DocCategory::TaxNotice),
            link(DocCategory::Payslip),
            link(DocCategory::Identity),
        ]);
        assert!(all.missing.is_empty());
        assert_eq!(
            all.received,
            vec![DocCategory::Identity, DocCategory::Payslip, DocCategory::TaxNotice]
        );
        assert_eq!(derive_status(DossierStatus::Incomplete, &all, 3), DossierStatus::ToValidate);
    }

    #[test]
    fn non_required_links_still_leave_everything_missing() {
        let checklist = compute(&[link(DocCategory::BankStatement)]);
        assert_eq!(checklist.missing, REQUIRED.to_vec());
        assert_eq!(
            derive_status(DossierStatus::New, &checklist, 1),
            DossierStatus::Incomplete
        );
    }

    #[test]
    fn terminal_status_survives_recompute() {
        let checklist = compute(&[]);
        assert_eq!(
            derive_status(DossierStatus::Validated, &checklist, 0),
            DossierStatus::Validated
        );
        assert_eq!(
            derive_status(DossierStatus::Rejected, &compute(&[link(DocCategory::Payslip)]), 1),
            DossierStatus::Rejected
        );
    }
}
