use crate::error::IntakeResult;
use crate::intake::audit;
use crate::intake::paths::IntakePaths;
use crate::intake::pipeline::{InboundMessage, IngestResult, Intake};
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const RESULT_SUFFIX: &str = ".result.json";

#[derive(Debug, Clone)]
pub struct SpoolEvent {
    pub file_path: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpoolOutcome {
    pub detected_files: usize,
    pub processed: usize,
    pub failed: usize,
    pub events: Vec<SpoolEvent>,
}

fn collect_messages(inbound: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(inbound) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", inbound.display()));
        }
    };
    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.is_file() && name.ends_with(".json") && !name.ends_with(RESULT_SUFFIX) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn ingest_file(intake: &Intake, path: &Path) -> IntakeResult<IngestResult> {
    let raw = fs::read_to_string(path)?;
    let msg: InboundMessage = serde_json::from_str(&raw)?;
    intake.ingest(&msg)
}

/// Move `path` into `dest_dir` and write its result beside it.
fn settle(path: &Path, dest_dir: &Path, result: &serde_json::Value) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("failed to create {}", dest_dir.display()))?;
    let name = path
        .file_name()
        .context("spool file has no name")?
        .to_string_lossy()
        .to_string();
    let dest = dest_dir.join(&name);
    fs::rename(path, &dest)
        .with_context(|| format!("failed to move {} to {}", path.display(), dest.display()))?;
    let stem = name.trim_end_matches(".json");
    let result_path = dest_dir.join(format!("{stem}{RESULT_SUFFIX}"));
    fs::write(&result_path, format!("{}\n", serde_json::to_string_pretty(result)?))
        .with_context(|| format!("failed to write {}", result_path.display()))?;
    Ok(dest)
}

fn handle(intake: &Intake, paths: &IntakePaths, path: &Path) -> SpoolEvent {
    let file_path = path.display().to_string();
    let (status, dest_dir, result, message) = match ingest_file(intake, path) {
        Ok(result) => {
            let message = format!(
                "dossier={} status={} decision={}",
                result
                    .dossier_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "none".into()),
                result.dossier_status,
                result.filter_decision
            );
            let value = serde_json::to_value(&result).unwrap_or_else(|_| json!({}));
            ("ok", paths.processed_dir(), value, message)
        }
        Err(err) => {
            tracing::warn!(file = %file_path, code = err.code(), "spool message failed: {err}");
            let value = json!({
                "error": err.code(),
                "message": err.to_string(),
                "transient": err.is_transient(),
            });
            ("failed", paths.failed_dir(), value, err.to_string())
        }
    };
    let audit_line = format!("file={file_path} {message}");
    if let Err(err) = audit::append_event(paths, "ingest", status, &audit_line) {
        tracing::warn!("audit append failed: {err:#}");
    }
    match settle(path, &dest_dir, &result) {
        Ok(_) => SpoolEvent {
            file_path,
            status: status.to_string(),
            message,
        },
        Err(err) => SpoolEvent {
            file_path,
            status: "failed".to_string(),
            message: format!("{message}; could not settle: {err:#}"),
        },
    }
}

/// Ingest every spooled message with up to `workers` threads.
pub fn drain(intake: &Intake, paths: &IntakePaths, workers: usize) -> Result<SpoolOutcome> {
    let files = collect_messages(&paths.inbound_dir)?;
    let mut out = SpoolOutcome {
        detected_files: files.len(),
        ..SpoolOutcome::default()
    };
    if files.is_empty() {
        return Ok(out);
    }

    let next = AtomicUsize::new(0);
    let events = Mutex::new(Vec::with_capacity(files.len()));
    std::thread::scope(|scope| {
        for _ in 0..workers.clamp(1, files.len()) {
            scope.spawn(|| {
                loop {
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let Some(path) = files.get(idx) else {
                        break;
                    };
                    let event = handle(intake, paths, path);
                    if let Ok(mut guard) = events.lock() {
                        guard.push(event);
                    }
                }
            });
        }
    });

    let mut events = events
        .into_inner()
        .map_err(|_| anyhow::anyhow!("spool worker panicked"))?;
    events.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    out.processed = events.iter().filter(|e| e.status == "ok").count();
    out.failed = events.len() - out.processed;
    out.events = events;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::config::IntakeConfig;
    use crate::intake::reply::OutboxMailer;
    use crate::intake::testkit::{EchoClassifier, b64, fixture};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn drain_moves_files_and_writes_results() {
        let tmp = tempdir().expect("tempdir");
        let fx = fixture(tmp.path());
        let paths = IntakePaths::under(tmp.path());
        let intake = Intake::new(
            fx.store.clone(),
            fx.content.clone(),
            Arc::new(EchoClassifier),
            Arc::new(OutboxMailer::new(paths.outbox_dir.clone(), "intake@test")),
            IntakeConfig::default(),
        )
        .expect("intake");

        fs::create_dir_all(&paths.inbound_dir).expect("inbound");
        for (i, name) in ["passport.pdf", "payslip.pdf", "tax_notice.pdf"].iter().enumerate() {
            let msg = json!({
                "tenant_hint": "intake+acme@x.test",
                "sender": "jane@x.com",
                "subject": "documents",
                "body": "attached",
                "attachments": [{
                    "filename": name,
                    "content_base64": b64(format!("doc-{i}").as_bytes()),
                    "declared_mime": "application/pdf"
                }]
            });
            let path = paths.inbound_dir.join(format!("m{i}.json"));
            fs::write(path, msg.to_string()).expect("write");
        }
        fs::write(paths.inbound_dir.join("broken.json"), "{not json").expect("broken");

        let out = drain(&intake, &paths, 3).expect("drain");
        assert_eq!(out.detected_files, 4);
        assert_eq!(out.processed, 3);
        assert_eq!(out.failed, 1);
        assert!(paths.processed_dir().join("m0.result.json").exists());
        assert!(paths.failed_dir().join("broken.result.json").exists());
        assert!(collect_messages(&paths.inbound_dir).expect("left").is_empty());

        let last: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(paths.processed_dir().join("m2.result.json")).expect("read"),
        )
        .expect("json");
        assert!(last["dossier_id"].is_u64());

        let audit = fs::read_to_string(paths.audit_log()).expect("audit");
        assert_eq!(audit.lines().count(), 4);
    }
}
