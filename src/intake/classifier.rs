use crate::error::{IntakeError, IntakeResult};
use crate::intake::config::ClassifierConfig;
use crate::intake::model::{ExtractedFields, HEURISTIC_PROVIDER};
use crate::intake::util::leading_chars;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

pub const FALLBACK_CATEGORY: &str = "other";
pub const FALLBACK_URGENCY: &str = "medium";
pub const FALLBACK_TITLE: &str = "Inbound message";
const FALLBACK_SUMMARY_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentVerdict {
    pub label: String,
    pub fields: ExtractedFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageVerdict {
    pub category: String,
    pub urgency: String,
    pub summary: String,
    pub suggested_title: String,
}

/// External classification service. Implementations may block; callers
/// bound them with [`with_timeout`].
pub trait Classifier: Send + Sync {
    fn provider(&self) -> &str;

    fn classify_document(
        &self,
        staged: &Path,
        filename: &str,
        mime: &str,
    ) -> IntakeResult<DocumentVerdict>;

    fn classify_message(
        &self,
        subject: &str,
        body: &str,
        context: &str,
    ) -> IntakeResult<MessageVerdict>;
}

/// Verdict used whenever message classification fails.
pub fn fallback_message_verdict(body: &str) -> MessageVerdict {
    MessageVerdict {
        category: FALLBACK_CATEGORY.to_string(),
        urgency: FALLBACK_URGENCY.to_string(),
        summary: leading_chars(body, FALLBACK_SUMMARY_CHARS),
        suggested_title: FALLBACK_TITLE.to_string(),
    }
}

/// Run `job` on its own thread and give up after `timeout`. A job that
/// overruns keeps running detached; its result is dropped.
pub fn with_timeout<T, F>(timeout: Duration, job: F) -> IntakeResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> IntakeResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("intake-classifier".into())
        .spawn(move || {
            let _ = tx.send(job());
        })?;
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(IntakeError::ClassifierUnavailable(format!(
            "timed out after {}s",
            timeout.as_secs()
        ))),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(IntakeError::ClassifierUnavailable(
            "classifier thread exited without a result".into(),
        )),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// First balanced `{...}` in `text` that parses as a JSON object. Tolerates
/// code fences and prose around it.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let text = strip_code_fence(text);
    let bytes = text.as_bytes();
    let mut start = 0usize;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, &b) in bytes.iter().enumerate().skip(open) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        if let Ok(value @ Value::Object(_)) =
                            serde_json::from_str::<Value>(&text[open..=i])
                        {
                            return Some(value);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        start = open + 1;
    }
    None
}

fn string_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

fn document_verdict_from_text(text: &str) -> IntakeResult<DocumentVerdict> {
    let json = extract_json_object(text).ok_or_else(|| {
        IntakeError::ClassifierUnavailable("document response had no JSON object".into())
    })?;
    let label = string_field(&json, "category_label")
        .or_else(|| string_field(&json, "category"))
        .ok_or_else(|| {
            IntakeError::ClassifierUnavailable("document response missing category_label".into())
        })?;
    Ok(DocumentVerdict {
        label,
        fields: ExtractedFields {
            sender: string_field(&json, "sender"),
            issued_date: string_field(&json, "issued_date"),
            amount: string_field(&json, "amount"),
            summary: string_field(&json, "summary"),
        },
    })
}

fn message_verdict_from_text(text: &str, body: &str) -> IntakeResult<MessageVerdict> {
    let json = extract_json_object(text).ok_or_else(|| {
        IntakeError::ClassifierUnavailable("message response had no JSON object".into())
    })?;
    let fallback = fallback_message_verdict(body);
    Ok(MessageVerdict {
        category: string_field(&json, "category_label")
            .or_else(|| string_field(&json, "category"))
            .unwrap_or(fallback.category),
        urgency: string_field(&json, "urgency").unwrap_or(fallback.urgency),
        summary: string_field(&json, "summary").unwrap_or(fallback.summary),
        suggested_title: string_field(&json, "suggested_title").unwrap_or(fallback.suggested_title),
    })
}

/// Filename-only classifier. Labels are the filename itself so the mapper
/// decides the category.
pub struct LocalClassifier;

const URGENT_MARKERS: &[&str] = &["urgent", "asap", "immediately", "today", "deadline"];

impl Classifier for LocalClassifier {
    fn provider(&self) -> &str {
        HEURISTIC_PROVIDER
    }

    fn classify_document(
        &self,
        _staged: &Path,
        filename: &str,
        _mime: &str,
    ) -> IntakeResult<DocumentVerdict> {
        Ok(DocumentVerdict {
            label: filename.to_string(),
            fields: ExtractedFields::default(),
        })
    }

    fn classify_message(
        &self,
        subject: &str,
        body: &str,
        context: &str,
    ) -> IntakeResult<MessageVerdict> {
        let haystack = format!("{subject} {body}").to_lowercase();
        let mut verdict = fallback_message_verdict(body);
        if URGENT_MARKERS.iter().any(|m| haystack.contains(m)) {
            verdict.urgency = "high".to_string();
        }
        if !context.trim().is_empty() {
            verdict.category = "rental_application".to_string();
        }
        if !subject.trim().is_empty() {
            verdict.suggested_title = leading_chars(subject, 80);
        }
        Ok(verdict)
    }
}

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiClassifier {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl GeminiClassifier {
    fn generate(&self, parts: Vec<Value>) -> IntakeResult<String> {
        let unavailable = |err: reqwest::Error| IntakeError::ClassifierUnavailable(err.to_string());
        let url = format!(
            "{GEMINI_ENDPOINT}/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let payload = serde_json::json!({ "contents": [{ "parts": parts }] });
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(unavailable)?;
        let response = client.post(&url).json(&payload).send().map_err(unavailable)?;
        if !response.status().is_success() {
            return Err(IntakeError::ClassifierUnavailable(format!(
                "gemini call failed with status {}",
                response.status()
            )));
        }
        let json: Value = response.json().map_err(unavailable)?;
        json.get("candidates")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("content"))
            .and_then(|v| v.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|v| v.get("text"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                IntakeError::ClassifierUnavailable("gemini response missing text content".into())
            })
    }
}

impl Classifier for GeminiClassifier {
    fn provider(&self) -> &str {
        "gemini"
    }

    fn classify_document(
        &self,
        staged: &Path,
        filename: &str,
        mime: &str,
    ) -> IntakeResult<DocumentVerdict> {
        let bytes = fs::read(staged)?;
        let prompt = format!(
            "You classify documents sent for a rental application. File name: {filename}.\n\
             Return strict JSON with keys: category_label (one of identity, payslip, tax_notice, \
             work_contract, bank_statement, other), sender, issued_date, amount, summary."
        );
        let text = self.generate(vec![
            serde_json::json!({ "text": prompt }),
            serde_json::json!({
                "inline_data": { "mime_type": mime, "data": BASE64.encode(bytes) }
            }),
        ])?;
        document_verdict_from_text(&text)
    }

    fn classify_message(
        &self,
        subject: &str,
        body: &str,
        context: &str,
    ) -> IntakeResult<MessageVerdict> {
        let prompt = format!(
            "You triage email for a property management agency.\n\
             Subject: {subject}\n{body}\n\
             Attachments: {context}\n\
             Return strict JSON with keys: category, urgency (low, medium, high), summary, \
             suggested_title."
        );
        let text = self.generate(vec![serde_json::json!({ "text": prompt })])?;
        message_verdict_from_text(&text, body)
    }
}

/// Remote provider when configured with a key, local heuristics otherwise.
pub fn build_classifier(cfg: &ClassifierConfig) -> Arc<dyn Classifier> {
    match (cfg.provider.as_str(), cfg.api_key.as_deref()) {
        ("gemini", Some(key)) if !key.trim().is_empty() => Arc::new(GeminiClassifier {
            api_key: key.trim().to_string(),
            model: cfg.model.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }),
        _ => Arc::new(LocalClassifier),
    }
}
