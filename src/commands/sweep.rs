use anyhow::Result;
use std::sync::atomic::AtomicBool;

use crate::commands::CommandReport;
use crate::intake::audit;
use crate::intake::retention::SweepOutcome;
use crate::intake::runtime::Runtime;
use crate::intake::util::now_epoch_secs;

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub once: bool,
    pub daemon: bool,
}

fn describe(report: &mut CommandReport, outcome: &SweepOutcome) {
    report.detail(format!("tenants_swept={}", outcome.tenants_swept));
    report.detail(format!("messages_deleted={}", outcome.messages_deleted));
    report.detail(format!("documents_deleted={}", outcome.documents_deleted));
    report.detail(format!("blobs_removed={}", outcome.blobs_removed));
    report.detail(format!("dossiers_recomputed={}", outcome.dossiers_recomputed));
    report.detail(format!("dossiers_anonymized={}", outcome.dossiers_anonymized));
    report.detail(format!("staging_removed={}", outcome.staging_removed));
    for failed in &outcome.tenants_failed {
        report.issue(format!("sweep failed for {failed}"));
    }
}

pub fn run(opts: &SweepOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("sweep");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    let rt = Runtime::open()?;
    let sweeper = rt.sweeper()?;
    if opts.daemon {
        report.detail(format!(
            "starting retention sweeper interval_secs={}",
            sweeper.interval().as_secs()
        ));
        let never = AtomicBool::new(false);
        sweeper.run_forever(&never);
        return Ok(report);
    }

    let outcome = sweeper.sweep_once(now_epoch_secs()?);
    describe(&mut report, &outcome);
    let status = if outcome.is_clean() { "ok" } else { "degraded" };
    let message = format!(
        "tenants={} messages={} documents={} anonymized={}",
        outcome.tenants_swept,
        outcome.messages_deleted,
        outcome.documents_deleted,
        outcome.dossiers_anonymized
    );
    if let Err(err) = audit::append_event(&rt.paths, "sweep", status, &message) {
        tracing::warn!("audit append failed: {err:#}");
    }
    Ok(report)
}
