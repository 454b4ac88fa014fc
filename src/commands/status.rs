use anyhow::Result;
use fs2::FileExt;
use std::env;
use std::fs::{self, OpenOptions};

use crate::commands::CommandReport;
use crate::intake::paths::IntakePaths;
use crate::intake::runtime::Runtime;
use crate::intake::util::render_epoch;

include!(concat!(env!("OUT_DIR"), "/intake_env_allowlist.rs"));

/// `INTAKE_*` variables set in the environment that nothing reads.
pub fn unknown_env_keys<I>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = keys
        .into_iter()
        .filter(|k| k.starts_with("INTAKE_"))
        .filter(|k| !GENERATED_INTAKE_ENV_ALLOWLIST.contains(&k.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

fn check_daemon(report: &mut CommandReport, paths: &IntakePaths) {
    let lock_path = paths.watch_lock_file();
    if !lock_path.exists() {
        report.detail("daemon.lock=not_found");
        return;
    }
    let held = match OpenOptions::new().read(true).write(true).open(&lock_path) {
        Ok(file) => match file.try_lock_exclusive() {
            Ok(()) => {
                let _ = FileExt::unlock(&file);
                false
            }
            Err(_) => true,
        },
        Err(err) => {
            report.issue(format!("daemon.lock=unreadable ({err})"));
            return;
        }
    };
    report.detail(format!("daemon.running={held}"));
    if !held {
        return;
    }

    let payload = fs::read_to_string(&lock_path)
        .ok()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw.trim()).ok());
    let Some(payload) = payload else {
        report.issue("daemon.lock=corrupt");
        return;
    };
    if let Some(pid) = payload.get("pid").and_then(|v| v.as_u64()) {
        report.detail(format!("daemon.pid={pid}"));
    }
    if let Some(at) = payload.get("started_at").and_then(|v| v.as_u64()) {
        report.detail(format!("daemon.started_at={}", render_epoch(at)));
    }
    if let Some(uuid) = payload.get("build_uuid").and_then(|v| v.as_str()) {
        let current = env!("BUILD_UUID");
        if uuid == current {
            report.detail("daemon.build_match=ok");
        } else {
            report.issue(format!(
                "daemon.build_mismatch=found (lock={uuid} current={current}); \
                 restart the watch daemon"
            ));
        }
    }
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let rt = Runtime::open()?;
    let paths = &rt.paths;
    let cfg = &rt.cfg;

    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));
    report.detail(format!("intake_home={}", paths.intake_home.display()));
    report.detail(format!("path.state_dir={}", paths.state_dir.display()));
    if let Some(snapshot) = rt.store.snapshot_path() {
        report.detail(format!(
            "store.snapshot={} exists={}",
            snapshot.display(),
            snapshot.exists()
        ));
    }
    for (name, path) in [
        ("state_dir", &paths.state_dir),
        ("blobs_dir", &paths.blobs_dir),
        ("staging_dir", &paths.staging_dir),
        ("logs_dir", &paths.logs_dir),
    ] {
        if !path.is_dir() {
            report.issue(format!("path.{name}=missing ({})", path.display()));
        }
    }
    for (name, path) in [
        ("inbound_dir", &paths.inbound_dir),
        ("outbox_dir", &paths.outbox_dir),
    ] {
        let state = if path.is_dir() { "ok" } else { "not_created" };
        report.detail(format!("path.{name}={} ({state})", path.display()));
    }
    report.detail(format!(
        "master_key={}",
        if env::var("INTAKE_MASTER_KEY").is_ok() {
            "env"
        } else if paths.master_key_file().exists() {
            "file"
        } else {
            "not_created"
        }
    ));

    report.detail(format!("classifier.provider={}", cfg.classifier.provider));
    report.detail(format!("classifier.model={}", cfg.classifier.model));
    report.detail(format!(
        "classifier.api_key_configured={}",
        cfg.classifier.api_key.is_some()
    ));
    report.detail(format!("prefilter.enabled={}", cfg.prefilter.enabled));
    report.detail(format!("reply.auto_send={}", cfg.reply.auto_send));
    report.detail(format!(
        "retention.defaults=messages:{}d documents:{}d closed_dossiers:{}d",
        cfg.retention.message_days, cfg.retention.document_days, cfg.retention.dossier_closed_days
    ));
    if cfg.classifier.provider == "gemini" && cfg.classifier.api_key.is_none() {
        report.detail("classifier.mode=heuristic (no API key)");
    }

    let counts = rt.store.transaction(|tx| Ok(tx.counts()))?;
    report.detail(format!("tenants={}", counts.tenants));
    report.detail(format!("dossiers={}", counts.dossiers));
    report.detail(format!("messages={}", counts.messages));
    report.detail(format!("documents={}", counts.documents));
    report.detail(format!("blobs={}", counts.blobs));
    if counts.tenants == 0 {
        report.issue("no tenant configured; add one with `dossier-intake tenant add`");
    }

    check_daemon(&mut report, paths);

    for key in unknown_env_keys(env::vars().map(|(k, _)| k)) {
        tracing::warn!(key = %key, "unrecognized INTAKE_ variable");
        report.detail(format!("env.unknown={key}"));
    }

    Ok(report)
}
