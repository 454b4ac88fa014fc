use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("document classifier unavailable: {0}")]
    ClassifierUnavailable(String),
    #[error("unsupported attachment kind: {filename} ({mime})")]
    UnsupportedAttachmentKind { filename: String, mime: String },
    #[error("attachment too large: {filename} ({bytes} bytes, limit {limit})")]
    AttachmentTooLarge {
        filename: String,
        bytes: usize,
        limit: usize,
    },
    #[error("dossier find-or-create kept conflicting for tenant {tenant_id}")]
    DossierRaceLost { tenant_id: u64 },
    #[error("storage write failed: {0}")]
    StorageWriteFailure(String),
    #[error("stored content is corrupt: {0}")]
    StorageCorrupt(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("dossier {0} is finalized (validated or rejected)")]
    DossierFinalized(u64),
    #[error("dossier {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: u64,
        from: &'static str,
        to: &'static str,
    },
    #[error("no tenant configured; add one with `dossier-intake tenant add`")]
    NoTenantConfigured,
    #[error("config invalid: {0}")]
    InvalidConfig(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type IntakeResult<T> = Result<T, IntakeError>;

impl IntakeError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Stable code used in warn events and audit lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClassifierUnavailable(_) => "CLASSIFIER_UNAVAILABLE",
            Self::UnsupportedAttachmentKind { .. } => "UNSUPPORTED_ATTACHMENT_KIND",
            Self::AttachmentTooLarge { .. } => "ATTACHMENT_TOO_LARGE",
            Self::DossierRaceLost { .. } => "DOSSIER_RACE_LOST",
            Self::StorageWriteFailure(_) => "STORAGE_WRITE_FAILURE",
            Self::StorageCorrupt(_) => "STORAGE_CORRUPT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::DossierFinalized(_) => "DOSSIER_FINALIZED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NoTenantConfigured => "NO_TENANT_CONFIGURED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Io(_) => "IO",
            Self::Json(_) => "JSON",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DossierRaceLost { .. } | Self::StoreUnavailable(_) | Self::Io(_)
        )
    }
}
