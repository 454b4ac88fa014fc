pub mod document;
pub mod dossier;
pub mod ingest;
pub mod status;
pub mod sweep;
pub mod tenant;
pub mod watch;

use crate::error::IntakeError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    /// Record an operator-facing refusal as an issue; infrastructure
    /// failures still abort the command.
    pub fn refuse(&mut self, err: IntakeError) -> anyhow::Result<()> {
        match err {
            IntakeError::NotFound { .. }
            | IntakeError::Conflict(_)
            | IntakeError::DossierFinalized(_)
            | IntakeError::InvalidTransition { .. }
            | IntakeError::NoTenantConfigured
            | IntakeError::StorageCorrupt(_) => {
                self.issue(format!("{}: {err}", err.code()));
                Ok(())
            }
            other => Err(other.into()),
        }
    }
}

pub(crate) fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_become_issues_but_io_propagates() {
        let mut report = CommandReport::new("dossier-validate");
        report
            .refuse(IntakeError::DossierFinalized(4))
            .expect("refusal is not fatal");
        assert!(!report.ok);
        assert!(report.issues[0].starts_with("DOSSIER_FINALIZED:"));

        let io = std::io::Error::other("disk gone");
        assert!(report.refuse(IntakeError::Io(io)).is_err());
    }
}
