use crate::intake::config::RetentionConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocCategory {
    Identity,
    Payslip,
    TaxNotice,
    WorkContract,
    BankStatement,
    Other,
}

impl DocCategory {
    pub const ALL: [DocCategory; 6] = [
        DocCategory::Identity,
        DocCategory::Payslip,
        DocCategory::TaxNotice,
        DocCategory::WorkContract,
        DocCategory::BankStatement,
        DocCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "IDENTITY",
            Self::Payslip => "PAYSLIP",
            Self::TaxNotice => "TAX_NOTICE",
            Self::WorkContract => "WORK_CONTRACT",
            Self::BankStatement => "BANK_STATEMENT",
            Self::Other => "OTHER",
        }
    }

    /// Human wording used in replies.
    pub fn label(self) -> &'static str {
        match self {
            Self::Identity => "identity document",
            Self::Payslip => "payslip",
            Self::TaxNotice => "tax notice",
            Self::WorkContract => "work contract",
            Self::BankStatement => "bank statement",
            Self::Other => "other document",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|c| c.as_str() == wanted)
    }
}

impl fmt::Display for DocCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DossierStatus {
    #[default]
    New,
    Incomplete,
    ToValidate,
    Validated,
    Rejected,
}

impl DossierStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Incomplete => "INCOMPLETE",
            Self::ToValidate => "TO_VALIDATE",
            Self::Validated => "VALIDATED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Set only by an explicit business action; recompute leaves these alone.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Validated | Self::Rejected)
    }
}

impl fmt::Display for DossierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived required/received/missing sets, kept in display order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Checklist {
    pub required: Vec<DocCategory>,
    pub received: Vec<DocCategory>,
    pub missing: Vec<DocCategory>,
}

impl Checklist {
    pub fn is_cleared(&self) -> bool {
        self.required.is_empty() && self.received.is_empty() && self.missing.is_empty()
    }
}

/// Per-tenant overrides; `None` falls back to the configured defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub message_days: Option<u64>,
    pub document_days: Option<u64>,
    pub dossier_closed_days: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveRetention {
    pub message_days: u64,
    pub document_days: u64,
    pub dossier_closed_days: u64,
}

impl RetentionPolicy {
    pub fn resolve(&self, defaults: &RetentionConfig) -> EffectiveRetention {
        EffectiveRetention {
            message_days: self.message_days.unwrap_or(defaults.message_days),
            document_days: self.document_days.unwrap_or(defaults.document_days),
            dossier_closed_days: self
                .dossier_closed_days
                .unwrap_or(defaults.dossier_closed_days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: u64,
    pub name: String,
    pub alias: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub retention: RetentionPolicy,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dossier {
    pub id: u64,
    pub tenant_id: u64,
    pub email: Option<String>,
    pub display_name: Option<String>,
    #[serde(default)]
    pub checklist: Checklist,
    #[serde(default)]
    pub status: DossierStatus,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    pub closed_at: Option<u64>,
    #[serde(default)]
    pub anonymized_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Dossier {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub tenant_id: u64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub urgency: String,
    pub summary: String,
    pub suggested_title: String,
    #[serde(default)]
    pub reply_sent: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedFields {
    pub sender: Option<String>,
    pub issued_date: Option<String>,
    pub amount: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub tenant_id: u64,
    pub fingerprint: String,
    pub storage_ref: String,
    pub filename: String,
    pub mime: String,
    pub category: DocCategory,
    pub raw_label: String,
    /// Provider that produced the label, or `heuristic` for the filename fallback.
    pub classified_by: String,
    #[serde(default)]
    pub fields: ExtractedFields,
    pub created_at: u64,
}

impl Document {
    pub fn is_heuristic(&self) -> bool {
        self.classified_by == HEURISTIC_PROVIDER
    }
}

pub const HEURISTIC_PROVIDER: &str = "heuristic";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub tenant_id: u64,
    pub fingerprint: String,
    pub storage_ref: String,
    pub size_bytes: usize,
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    Classified,
    NeedsReview,
}

impl LinkQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classified => "classified",
            Self::NeedsReview => "needs_review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLink {
    pub dossier_id: u64,
    pub message_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub dossier_id: u64,
    pub document_id: u64,
    pub category: DocCategory,
    pub quality: LinkQuality,
    pub linked_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips_through_its_wire_name() {
        for category in DocCategory::ALL {
            assert_eq!(DocCategory::parse(category.as_str()), Some(category));
        }
        assert_eq!(
            serde_json::to_string(&DocCategory::TaxNotice).expect("json"),
            "\"TAX_NOTICE\""
        );
    }

    #[test]
    fn tenant_policy_overrides_only_what_it_sets() {
        let defaults = RetentionConfig::default();
        let policy = RetentionPolicy {
            dossier_closed_days: Some(7),
            ..RetentionPolicy::default()
        };
        let effective = policy.resolve(&defaults);
        assert_eq!(effective.dossier_closed_days, 7);
        assert_eq!(effective.message_days, defaults.message_days);
    }
}
