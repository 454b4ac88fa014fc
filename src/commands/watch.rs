use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::commands::CommandReport;
use crate::intake::audit;
use crate::intake::runtime::Runtime;
use crate::intake::spool::{self, SpoolOutcome};
use crate::intake::util::now_epoch_secs;
use serde_json::json;

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub once: bool,
    pub daemon: bool,
}

fn describe(report: &mut CommandReport, outcome: &SpoolOutcome) {
    report.detail(format!("spool.detected_files={}", outcome.detected_files));
    report.detail(format!("spool.processed={}", outcome.processed));
    report.detail(format!("spool.failed={}", outcome.failed));
    for event in &outcome.events {
        report.detail(format!(
            "spool.event={} status={} message={}",
            event.file_path, event.status, event.message
        ));
    }
}

fn audit_cycle(rt: &Runtime, outcome: &SpoolOutcome) {
    if outcome.detected_files == 0 {
        return;
    }
    let status = if outcome.failed == 0 { "ok" } else { "degraded" };
    let message = format!(
        "detected={} processed={} failed={}",
        outcome.detected_files, outcome.processed, outcome.failed
    );
    if let Err(err) = audit::append_event(&rt.paths, "watch", status, &message) {
        tracing::warn!("audit append failed: {err:#}");
    }
}

fn run_daemon(rt: &Runtime) -> Result<()> {
    let lock_path = rt.paths.watch_lock_file();
    let mut lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;
    lock.try_lock_exclusive().with_context(|| {
        format!(
            "another watch daemon holds {}; stop it first",
            lock_path.display()
        )
    })?;
    lock.set_len(0)?;
    let payload = json!({
        "pid": std::process::id(),
        "build_uuid": env!("BUILD_UUID"),
        "started_at": now_epoch_secs()?,
    });
    writeln!(lock, "{payload}")?;
    lock.flush()?;

    fs::create_dir_all(&rt.paths.inbound_dir)
        .with_context(|| format!("failed to create {}", rt.paths.inbound_dir.display()))?;
    let intake = rt.intake()?;
    let sweeper = rt.sweeper()?;
    let poll = Duration::from_secs(rt.cfg.watch.poll_interval_secs.max(1));
    let stop = AtomicBool::new(false);
    tracing::info!(
        inbound = %rt.paths.inbound_dir.display(),
        poll_secs = poll.as_secs(),
        workers = rt.cfg.watch.workers,
        "watch daemon started"
    );

    let result = thread::scope(|scope| {
        scope.spawn(|| sweeper.run_forever(&stop));
        let result = loop {
            match spool::drain(&intake, &rt.paths, rt.cfg.watch.workers) {
                Ok(outcome) => audit_cycle(rt, &outcome),
                Err(err) => break Err(err),
            }
            thread::sleep(poll);
        };
        stop.store(true, Ordering::SeqCst);
        result
    });
    FileExt::unlock(&lock)?;
    result
}

pub fn run(opts: &WatchOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("watch");

    if opts.once && opts.daemon {
        report.issue("invalid flags: use only one of --once or --daemon");
        return Ok(report);
    }

    let rt = Runtime::open()?;
    if opts.daemon {
        report.detail("starting watch daemon");
        run_daemon(&rt)?;
        return Ok(report);
    }

    let intake = rt.intake()?;
    let outcome = spool::drain(&intake, &rt.paths, rt.cfg.watch.workers)?;
    report.detail(format!("inbound_dir={}", rt.paths.inbound_dir.display()));
    describe(&mut report, &outcome);
    audit_cycle(&rt, &outcome);
    if outcome.failed > 0 {
        report.issue(format!(
            "{} spooled message(s) failed; see {}",
            outcome.failed,
            rt.paths.failed_dir().display()
        ));
    }
    Ok(report)
}
