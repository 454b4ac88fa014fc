//! Context-aware acknowledgement text and the outbound mail seam.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::model::{DocCategory, DossierStatus};
use crate::intake::prefilter::ORIGIN_HEADER;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Fire-and-forget delivery. Callers log failures and move on.
pub trait Mailer: Send + Sync {
    fn send(&self, to: &str, subject: &str, body: &str) -> IntakeResult<()>;
}

/// Writes each reply as an `.eml` file under the outbox directory.
pub struct OutboxMailer {
    outbox_dir: PathBuf,
    from: String,
}

impl OutboxMailer {
    pub fn new(outbox_dir: PathBuf, from: impl Into<String>) -> Self {
        Self {
            outbox_dir,
            from: from.into(),
        }
    }
}

fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

impl Mailer for OutboxMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> IntakeResult<()> {
        fs::create_dir_all(&self.outbox_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("reply-")
            .suffix(".eml")
            .tempfile_in(&self.outbox_dir)?;
        write!(
            file,
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n{}: dossier-intake\r\n\r\n{}",
            header_safe(&self.from),
            header_safe(to),
            header_safe(subject),
            ORIGIN_HEADER,
            body
        )?;
        file.flush()?;
        file.keep()
            .map_err(|err| IntakeError::Io(err.error))?;
        Ok(())
    }
}

pub struct ReplyContext<'a> {
    pub display_name: Option<&'a str>,
    pub original_subject: &'a str,
    pub added: &'a [DocCategory],
    pub duplicates: &'a [DocCategory],
    pub missing: &'a [DocCategory],
    pub status: DossierStatus,
}

fn list(categories: &[DocCategory]) -> String {
    categories
        .iter()
        .map(|c| c.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Returns `(subject, body)`.
pub fn compose_reply(ctx: &ReplyContext<'_>) -> (String, String) {
    let subject = if ctx.original_subject.trim().is_empty() {
        "Your rental application".to_string()
    } else {
        format!("Re: {}", ctx.original_subject.trim())
    };

    let mut body = match ctx.display_name {
        Some(name) => format!("Hello {name},\n\n"),
        None => "Hello,\n\n".to_string(),
    };
    if ctx.added.is_empty() {
        body.push_str("Thank you for your message.\n");
    } else {
        body.push_str(&format!("We received your {}.\n", list(ctx.added)));
    }
    if !ctx.duplicates.is_empty() {
        body.push_str(&format!(
            "We already have your {} on file; we kept the copy sent earlier.\n",
            list(ctx.duplicates)
        ));
    }
    match ctx.status {
        DossierStatus::ToValidate | DossierStatus::Validated => {
            body.push_str("Your file is now complete and will be reviewed shortly.\n");
        }
        _ if !ctx.missing.is_empty() => {
            body.push_str(&format!("Still missing: {}.\n", list(ctx.missing)));
        }
        _ => {}
    }
    body.push_str("\nBest regards,\nThe lettings team\n");
    (subject, body)
}
