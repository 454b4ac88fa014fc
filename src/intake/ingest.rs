//! Attachment ingestion: allow-list, limits, content store, best-effort
//! classification, document insert-or-fetch.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::classifier::{Classifier, DocumentVerdict, with_timeout};
use crate::intake::classify::map_label;
use crate::intake::config::LimitsConfig;
use crate::intake::content_store::ContentStore;
use crate::intake::model::{DocCategory, Document, ExtractedFields, HEURISTIC_PROVIDER};
use crate::intake::store::{NewDocument, Store};
use crate::intake::warn::{self, WarnEvent};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    #[serde(default, alias = "bytes")]
    pub content_base64: String,
    #[serde(default, alias = "content_type")]
    pub declared_mime: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAttachment {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestedAttachments {
    pub document_ids: Vec<u64>,
    pub summaries: Vec<String>,
    pub skipped: Vec<SkippedAttachment>,
    /// Some attachment fell back to the filename heuristic.
    pub degraded: bool,
}

impl IngestedAttachments {
    /// Context string handed to message classification.
    pub fn context(&self) -> String {
        self.summaries.join("; ")
    }
}

struct Resolved {
    document: Document,
    degraded: bool,
}

pub struct AttachmentIngestor {
    store: Arc<Store>,
    content: Arc<ContentStore>,
    classifier: Arc<dyn Classifier>,
    limits: LimitsConfig,
    timeout: Duration,
}

fn kind_of_mime(mime: &str) -> Option<&'static str> {
    match mime {
        "application/pdf" => Some("pdf"),
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpeg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        "image/tiff" => Some("tiff"),
        _ => None,
    }
}

/// Declared MIME wins unless it is missing or generic; then the extension
/// decides. Returns the MIME to record when its kind is allowed.
fn accepted_mime(filename: &str, declared: &str, allowed: &[String]) -> Option<String> {
    let declared = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let mime = if declared.is_empty() || declared == "application/octet-stream" {
        mime_guess::from_path(filename).first_raw()?.to_string()
    } else {
        declared
    };
    let kind = kind_of_mime(&mime)?;
    allowed
        .iter()
        .any(|a| a.eq_ignore_ascii_case(kind))
        .then_some(mime)
}

fn summary_line(document: &Document) -> String {
    match document.fields.summary.as_deref() {
        Some(summary) => format!(
            "{} ({}): {}",
            document.filename,
            document.category.label(),
            summary
        ),
        None => format!("{} ({})", document.filename, document.category.label()),
    }
}

impl AttachmentIngestor {
    pub fn new(
        store: Arc<Store>,
        content: Arc<ContentStore>,
        classifier: Arc<dyn Classifier>,
        limits: LimitsConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            content,
            classifier,
            limits,
            timeout,
        }
    }

    /// Process every attachment for `tenant_id`. Per-attachment failures are
    /// recorded in `skipped` and never abort the batch.
    pub fn ingest(&self, tenant_id: u64, attachments: &[AttachmentPayload]) -> IngestedAttachments {
        let mut out = IngestedAttachments::default();
        for (idx, attachment) in attachments.iter().enumerate() {
            if idx >= self.limits.max_attachments {
                self.skip(
                    &mut out,
                    tenant_id,
                    attachment,
                    "TOO_MANY_ATTACHMENTS",
                    &format!("limit is {}", self.limits.max_attachments),
                );
                continue;
            }
            match self.ingest_one(tenant_id, attachment) {
                Ok(resolved) => {
                    out.degraded |= resolved.degraded;
                    if !out.document_ids.contains(&resolved.document.id) {
                        out.document_ids.push(resolved.document.id);
                        out.summaries.push(summary_line(&resolved.document));
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    self.skip(&mut out, tenant_id, attachment, err.code(), &reason);
                }
            }
        }
        out
    }

    fn skip(
        &self,
        out: &mut IngestedAttachments,
        tenant_id: u64,
        attachment: &AttachmentPayload,
        code: &str,
        reason: &str,
    ) {
        warn::emit(&WarnEvent {
            code,
            stage: "attachment",
            action: "skip",
            tenant: &tenant_id.to_string(),
            subject: &attachment.filename,
            retry: "no",
            reason,
            err: code,
        });
        out.skipped.push(SkippedAttachment {
            filename: attachment.filename.clone(),
            reason: code.to_string(),
        });
    }

    fn ingest_one(&self, tenant_id: u64, attachment: &AttachmentPayload) -> IntakeResult<Resolved> {
        let filename = attachment.filename.trim();
        let mime = accepted_mime(filename, &attachment.declared_mime, &self.limits.allowed_kinds)
            .ok_or_else(|| IntakeError::UnsupportedAttachmentKind {
                filename: filename.to_string(),
                mime: attachment.declared_mime.clone(),
            })?;

        let encoded = attachment.content_base64.trim();
        let estimated = encoded.len() / 4 * 3;
        if estimated > self.limits.max_attachment_bytes.saturating_add(2) {
            return Err(IntakeError::AttachmentTooLarge {
                filename: filename.to_string(),
                bytes: estimated,
                limit: self.limits.max_attachment_bytes,
            });
        }
        let bytes = BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| IntakeError::UnsupportedAttachmentKind {
                filename: filename.to_string(),
                mime: "undecodable payload".into(),
            })?;
        if bytes.len() > self.limits.max_attachment_bytes {
            return Err(IntakeError::AttachmentTooLarge {
                filename: filename.to_string(),
                bytes: bytes.len(),
                limit: self.limits.max_attachment_bytes,
            });
        }

        let mut stored = self.content.put(tenant_id, &bytes)?;
        if let Some(existing) = self
            .store
            .transaction(|tx| Ok(tx.document_by_fingerprint(tenant_id, &stored.fingerprint)))?
        {
            tracing::debug!(
                tenant_id,
                document_id = existing.id,
                blob_deduped = stored.deduped,
                "attachment already on file"
            );
            return Ok(Resolved {
                document: existing,
                degraded: false,
            });
        }

        let (category, raw_label, classified_by, fields, degraded) =
            match self.classify(&bytes, filename, &mime) {
                Ok(verdict) => {
                    let mut category = map_label(&verdict.label);
                    if category == DocCategory::Other {
                        category = map_label(filename);
                    }
                    let provider = self.classifier.provider().to_string();
                    (category, verdict.label, provider, verdict.fields, false)
                }
                Err(err) => {
                    warn::emit(&WarnEvent {
                        code: err.code(),
                        stage: "classify_document",
                        action: "fallback_filename",
                        tenant: &tenant_id.to_string(),
                        subject: filename,
                        retry: "no",
                        reason: "classifier failed; using filename heuristic",
                        err: &err.to_string(),
                    });
                    let category = map_label(filename);
                    let fields = ExtractedFields {
                        summary: Some(format!("unclassified upload filed as {}", category.label())),
                        ..ExtractedFields::default()
                    };
                    (category, filename.to_string(), HEURISTIC_PROVIDER.to_string(), fields, true)
                }
            };

        let template = NewDocument {
            tenant_id,
            fingerprint: stored.fingerprint.clone(),
            storage_ref: stored.reference.clone(),
            filename: filename.to_string(),
            mime,
            category,
            raw_label,
            classified_by,
            fields,
        };
        // Insert-or-fetch on (tenant, fingerprint). The blob row must still
        // point at our reference; retention may have purged it meanwhile.
        let mut restored = false;
        loop {
            let inserted = self.store.transaction(|tx| {
                if let Some(existing) = tx.document_by_fingerprint(tenant_id, &stored.fingerprint) {
                    return Ok(Some(existing));
                }
                match tx.blob(tenant_id, &stored.fingerprint) {
                    Some(blob) if blob.storage_ref == stored.reference => tx
                        .insert_document(NewDocument {
                            storage_ref: stored.reference.clone(),
                            ..template.clone()
                        })
                        .map(Some),
                    _ => Ok(None),
                }
            })?;
            if let Some(document) = inserted {
                return Ok(Resolved { document, degraded });
            }
            if restored {
                return Err(IntakeError::StorageWriteFailure(format!(
                    "blob {} removed before its document was recorded",
                    stored.fingerprint
                )));
            }
            tracing::debug!(
                tenant_id,
                reference = %stored.reference,
                "blob purged before document insert; storing again"
            );
            stored = self.content.put(tenant_id, &bytes)?;
            restored = true;
        }
    }

    fn classify(&self, bytes: &[u8], filename: &str, mime: &str) -> IntakeResult<DocumentVerdict> {
        let staged = self.content.stage(bytes)?;
        let path = staged.path().to_path_buf();
        let classifier = Arc::clone(&self.classifier);
        let (filename, mime) = (filename.to_string(), mime.to_string());
        let verdict = with_timeout(self.timeout, move || {
            classifier.classify_document(&path, &filename, &mime)
        });
        drop(staged);
        verdict
    }
}
