use anyhow::Result;

use crate::commands::{CommandReport, join_display};
use crate::error::IntakeResult;
use crate::intake::dossier;
use crate::intake::links;
use crate::intake::model::Dossier;
use crate::intake::runtime::Runtime;
use crate::intake::util::{render_epoch, truncate_with_ellipsis};

const NAME_CHARS: usize = 40;

fn summarize(report: &mut CommandReport, d: &Dossier) {
    report.detail(format!(
        "dossier id={} tenant={} email={} name={} status={} missing={} closed={}",
        d.id,
        d.tenant_id,
        d.email.as_deref().unwrap_or("-"),
        d.display_name
            .as_deref()
            .map(|n| truncate_with_ellipsis(n, NAME_CHARS))
            .unwrap_or_else(|| "-".into()),
        d.status,
        join_display(&d.checklist.missing),
        d.is_closed()
    ));
}

fn describe(report: &mut CommandReport, d: &Dossier) {
    report.detail(format!("id={}", d.id));
    report.detail(format!("tenant_id={}", d.tenant_id));
    report.detail(format!("email={}", d.email.as_deref().unwrap_or("-")));
    report.detail(format!(
        "display_name={}",
        d.display_name.as_deref().unwrap_or("-")
    ));
    report.detail(format!("status={}", d.status));
    if d.checklist.is_cleared() {
        report.detail("checklist=empty");
    } else {
        report.detail(format!("required={}", join_display(&d.checklist.required)));
        report.detail(format!("received={}", join_display(&d.checklist.received)));
        report.detail(format!("missing={}", join_display(&d.checklist.missing)));
    }
    report.detail(format!("risk_flags={}", d.risk_flags.join(",")));
    if let Some(at) = d.closed_at {
        report.detail(format!("closed_at={}", render_epoch(at)));
    }
    if let Some(at) = d.anonymized_at {
        report.detail(format!("anonymized_at={}", render_epoch(at)));
    }
    report.detail(format!("updated_at={}", render_epoch(d.updated_at)));
}

fn finish(mut report: CommandReport, outcome: IntakeResult<Dossier>) -> Result<CommandReport> {
    match outcome {
        Ok(d) => describe(&mut report, &d),
        Err(err) => report.refuse(err)?,
    }
    Ok(report)
}

pub fn list(tenant: Option<u64>) -> Result<CommandReport> {
    let mut report = CommandReport::new("dossier-list");
    let rt = Runtime::open()?;
    let dossiers = rt.store.transaction(|tx| {
        let tenant_ids = match tenant {
            Some(id) => vec![tx.tenant(id)?.id],
            None => tx.tenants().into_iter().map(|t| t.id).collect(),
        };
        Ok(tenant_ids
            .into_iter()
            .flat_map(|id| tx.dossiers_for_tenant(id))
            .collect::<Vec<_>>())
    });
    match dossiers {
        Ok(dossiers) => {
            report.detail(format!("dossiers={}", dossiers.len()));
            for d in &dossiers {
                summarize(&mut report, d);
            }
        }
        Err(err) => report.refuse(err)?,
    }
    Ok(report)
}

pub fn show(id: u64) -> Result<CommandReport> {
    let mut report = CommandReport::new("dossier-show");
    let rt = Runtime::open()?;
    let found = rt.store.transaction(|tx| {
        let d = tx.dossier(id)?;
        let messages = tx.message_ids_for(id);
        let mut documents = Vec::new();
        for link in tx.document_links_for(id) {
            let doc = tx.document(link.document_id)?;
            documents.push((link, doc));
        }
        Ok((d, messages, documents))
    });
    match found {
        Ok((d, messages, documents)) => {
            describe(&mut report, &d);
            report.detail(format!("message_ids={}", join_display(&messages)));
            for (link, doc) in documents {
                report.detail(format!(
                    "document id={} category={} quality={} filename={} classified_by={}",
                    doc.id,
                    link.category,
                    link.quality.as_str(),
                    doc.filename,
                    doc.classified_by
                ));
            }
        }
        Err(err) => report.refuse(err)?,
    }
    Ok(report)
}

pub fn close(id: u64) -> Result<CommandReport> {
    let rt = Runtime::open()?;
    finish(CommandReport::new("dossier-close"), dossier::close(&rt.store, id))
}

pub fn validate(id: u64) -> Result<CommandReport> {
    let rt = Runtime::open()?;
    finish(
        CommandReport::new("dossier-validate"),
        dossier::validate(&rt.store, id),
    )
}

pub fn reject(id: u64) -> Result<CommandReport> {
    let rt = Runtime::open()?;
    finish(
        CommandReport::new("dossier-reject"),
        dossier::reject(&rt.store, id),
    )
}

pub fn unlink(id: u64, document_id: u64) -> Result<CommandReport> {
    let rt = Runtime::open()?;
    finish(
        CommandReport::new("dossier-unlink"),
        links::unlink_document(&rt.store, id, document_id),
    )
}
