use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::{CommandReport, join_display};
use crate::intake::audit;
use crate::intake::pipeline::{InboundMessage, IngestResult};
use crate::intake::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub file: PathBuf,
}

pub fn describe(report: &mut CommandReport, result: &IngestResult) {
    report.detail(format!("tenant_id={}", result.tenant_id));
    report.detail(format!(
        "dossier_id={}",
        result
            .dossier_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".into())
    ));
    report.detail(format!("dossier_status={}", result.dossier_status));
    report.detail(format!(
        "message_id={}",
        result
            .message_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".into())
    ));
    report.detail(format!("document_ids={}", join_display(&result.document_ids)));
    report.detail(format!(
        "added_categories={}",
        join_display(&result.added_categories)
    ));
    report.detail(format!(
        "duplicate_categories={}",
        join_display(&result.duplicate_categories)
    ));
    report.detail(format!(
        "missing_categories={}",
        join_display(&result.missing_categories)
    ));
    report.detail(format!("filter.decision={}", result.filter_decision));
    report.detail(format!("filter.score={}", result.filter_score));
    report.detail(format!("filter.reasons={}", result.filter_reasons.join(",")));
    for skipped in &result.skipped_attachments {
        report.detail(format!(
            "skipped_attachment={} reason={}",
            skipped.filename, skipped.reason
        ));
    }
    report.detail(format!("classifier_degraded={}", result.classifier_degraded));
    report.detail(format!("reply_sent={}", result.reply_sent));
}

pub fn run(opts: &IngestOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("ingest");
    let rt = Runtime::open()?;

    let raw = fs::read_to_string(&opts.file)
        .with_context(|| format!("failed to read {}", opts.file.display()))?;
    let msg: InboundMessage = serde_json::from_str(&raw)
        .with_context(|| format!("invalid inbound message in {}", opts.file.display()))?;

    let intake = match rt.intake() {
        Ok(intake) => intake,
        Err(err) => match err.downcast::<crate::error::IntakeError>() {
            Ok(domain) => {
                report.refuse(domain)?;
                return Ok(report);
            }
            Err(other) => return Err(other),
        },
    };

    let result = match intake.ingest(&msg) {
        Ok(result) => result,
        Err(err) => {
            let _ = audit::append_event(&rt.paths, "ingest", "failed", &err.to_string());
            return Err(err.into());
        }
    };
    describe(&mut report, &result);

    let summary = format!(
        "file={} dossier={} status={} decision={}",
        opts.file.display(),
        result
            .dossier_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".into()),
        result.dossier_status,
        result.filter_decision
    );
    if let Err(err) = audit::append_event(&rt.paths, "ingest", "ok", &summary) {
        tracing::warn!("audit append failed: {err:#}");
    }
    Ok(report)
}
