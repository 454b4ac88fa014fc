use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::intake::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub id: u64,
    pub out: PathBuf,
}

/// Decrypt a stored document to `out` after verifying its fingerprint.
pub fn export(opts: &ExportOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("document-export");
    let rt = Runtime::open()?;
    let doc = match rt.store.transaction(|tx| tx.document(opts.id)) {
        Ok(doc) => doc,
        Err(err) => {
            report.refuse(err)?;
            return Ok(report);
        }
    };
    let content = rt.content_store()?;
    let bytes = match content.get(&doc.storage_ref) {
        Ok(bytes) => bytes,
        Err(err) => {
            report.refuse(err)?;
            return Ok(report);
        }
    };
    if let Some(parent) = opts.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&opts.out, &bytes)
        .with_context(|| format!("failed to write {}", opts.out.display()))?;

    report.detail(format!("document_id={}", doc.id));
    report.detail(format!("category={}", doc.category));
    report.detail(format!("filename={}", doc.filename));
    report.detail(format!("mime={}", doc.mime));
    report.detail(format!("fingerprint={}", doc.fingerprint));
    report.detail(format!("bytes={}", bytes.len()));
    report.detail(format!("out={}", opts.out.display()));
    Ok(report)
}
