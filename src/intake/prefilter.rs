//! Explainable business score applied before any classification work.

use crate::intake::config::PrefilterConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header stamped on our own outbound replies.
pub const ORIGIN_HEADER: &str = "X-Intake-Origin";

const BLACKLIST: &[&str] = &[
    "postmaster",
    "mailer-daemon",
    "notification",
    "no-reply",
    "noreply",
    "donotreply",
    "newsletter",
    "unsubscribe",
    "se désabonner",
    "se desabonner",
    "mailchimp",
    "sendinblue",
    "sg-mkt",
    "emailing",
];

const BUSINESS_KEYWORDS: &[&str] = &[
    "dossier",
    "rental",
    "tenant",
    "lease",
    "location",
    "locataire",
    "payslip",
    "bulletin",
    "fiche de paie",
    "tax notice",
    "avis",
    "impôt",
    "impot",
    "imposition",
    "identity",
    "identité",
    "pièce",
];

const MARKETING_KEYWORDS: &[&str] = &[
    "promo",
    "offer",
    "offre",
    "discount",
    "réduction",
    "newsletter",
];

const ATTACHMENT_POINTS: i32 = 40;
const KEYWORD_POINTS: i32 = 10;
const MARKETING_PENALTY: i32 = 30;
const SHORT_BODY_PENALTY: i32 = 15;
const SHORT_BODY_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterDecision {
    ProcessFull,
    ProcessLight,
    Ignore,
}

impl FilterDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessFull => "PROCESS_FULL",
            Self::ProcessLight => "PROCESS_LIGHT",
            Self::Ignore => "IGNORE",
        }
    }
}

impl fmt::Display for FilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub decision: FilterDecision,
    pub score: i32,
    pub reasons: Vec<String>,
}

impl FilterVerdict {
    fn ignore(reason: String) -> Self {
        Self {
            decision: FilterDecision::Ignore,
            score: 0,
            reasons: vec![reason],
        }
    }
}

pub struct InboundView<'a> {
    pub headers: &'a BTreeMap<String, String>,
    pub sender: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub attachment_count: usize,
}

fn has_origin_header(headers: &BTreeMap<String, String>) -> bool {
    headers
        .iter()
        .any(|(k, v)| k.eq_ignore_ascii_case(ORIGIN_HEADER) && !v.trim().is_empty())
}

pub fn score(view: &InboundView<'_>) -> (i32, Vec<String>) {
    let text = format!("{} {} {}", view.sender, view.subject, view.body).to_lowercase();
    let mut score = 0;
    let mut reasons = Vec::new();

    if view.attachment_count > 0 {
        score += ATTACHMENT_POINTS;
        reasons.push("attachments_present".to_string());
    }
    if let Some(kw) = BUSINESS_KEYWORDS.iter().find(|kw| text.contains(*kw)) {
        score += KEYWORD_POINTS;
        reasons.push(format!("keyword:{kw}"));
    }
    for kw in MARKETING_KEYWORDS.iter().filter(|kw| text.contains(*kw)) {
        score -= MARKETING_PENALTY;
        reasons.push(format!("marketing:{kw}"));
    }
    if view.body.trim().chars().count() < SHORT_BODY_CHARS && view.attachment_count == 0 {
        score -= SHORT_BODY_PENALTY;
        reasons.push("short_body_no_attachment".to_string());
    }
    (score, reasons)
}

pub fn evaluate(cfg: &PrefilterConfig, view: &InboundView<'_>) -> FilterVerdict {
    if !cfg.enabled {
        return FilterVerdict {
            decision: FilterDecision::ProcessFull,
            score: 0,
            reasons: vec!["prefilter_disabled".to_string()],
        };
    }
    if has_origin_header(view.headers) {
        return FilterVerdict::ignore("loop_guard".to_string());
    }
    let haystacks = [
        view.sender.to_lowercase(),
        view.subject.to_lowercase(),
        view.body.to_lowercase(),
    ];
    if let Some(word) = BLACKLIST
        .iter()
        .find(|w| haystacks.iter().any(|h| h.contains(*w)))
    {
        return FilterVerdict::ignore(format!("blacklist:{word}"));
    }

    let (score, reasons) = score(view);
    let decision = if score >= cfg.process_threshold {
        FilterDecision::ProcessFull
    } else if score >= cfg.light_threshold {
        FilterDecision::ProcessLight
    } else {
        FilterDecision::Ignore
    };
    FilterVerdict {
        decision,
        score,
        reasons,
    }
}
