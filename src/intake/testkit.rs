//! Fixtures and classifier doubles shared by the unit tests.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::classifier::{Classifier, DocumentVerdict, MessageVerdict};
use crate::intake::content_store::{ContentStore, MASTER_KEY_LEN};
use crate::intake::model::{ExtractedFields, RetentionPolicy};
use crate::intake::store::{NewTenant, Store};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub struct Fixture {
    pub store: Arc<Store>,
    pub content: Arc<ContentStore>,
    pub staging_dir: PathBuf,
    pub acme: u64,
    pub globex: u64,
}

pub fn fixture(root: &Path) -> Fixture {
    let store = Arc::new(Store::in_memory());
    let (acme, globex) = store
        .transaction(|tx| {
            let acme = tx.insert_tenant(NewTenant {
                name: "Acme".into(),
                alias: Some("acme".into()),
                is_default: false,
                retention: RetentionPolicy::default(),
            })?;
            let globex = tx.insert_tenant(NewTenant {
                name: "Globex".into(),
                alias: Some("globex".into()),
                is_default: true,
                retention: RetentionPolicy::default(),
            })?;
            Ok((acme.id, globex.id))
        })
        .expect("tenants");
    let staging_dir = root.join("staging");
    let content = Arc::new(ContentStore::new(
        store.clone(),
        root.join("blobs"),
        staging_dir.clone(),
        [3u8; MASTER_KEY_LEN],
    ));
    Fixture {
        store,
        content,
        staging_dir,
        acme,
        globex,
    }
}

pub fn b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Answers with a fixed document label and counts calls.
pub struct FixedClassifier {
    pub label: String,
    pub calls: AtomicUsize,
}

impl FixedClassifier {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for FixedClassifier {
    fn provider(&self) -> &str {
        "fixed"
    }

    fn classify_document(&self, _: &Path, _: &str, _: &str) -> IntakeResult<DocumentVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(DocumentVerdict {
            label: self.label.clone(),
            fields: ExtractedFields {
                summary: Some(format!("looks like a {}", self.label)),
                ..ExtractedFields::default()
            },
        })
    }

    fn classify_message(&self, subject: &str, _: &str, _: &str) -> IntakeResult<MessageVerdict> {
        Ok(MessageVerdict {
            category: "rental_application".into(),
            urgency: "low".into(),
            summary: format!("about {subject}"),
            suggested_title: subject.to_string(),
        })
    }
}

/// Labels each document by its filename, like the remote service would.
pub struct EchoClassifier;

impl Classifier for EchoClassifier {
    fn provider(&self) -> &str {
        "echo"
    }

    fn classify_document(
        &self,
        _: &Path,
        filename: &str,
        _: &str,
    ) -> IntakeResult<DocumentVerdict> {
        Ok(DocumentVerdict {
            label: filename.to_string(),
            fields: ExtractedFields::default(),
        })
    }

    fn classify_message(&self, subject: &str, body: &str, _: &str) -> IntakeResult<MessageVerdict> {
        Ok(MessageVerdict {
            category: "rental_application".into(),
            urgency: "medium".into(),
            summary: body.chars().take(40).collect(),
            suggested_title: subject.to_string(),
        })
    }
}

pub struct FailingClassifier;

impl Classifier for FailingClassifier {
    fn provider(&self) -> &str {
        "failing"
    }

    fn classify_document(&self, _: &Path, _: &str, _: &str) -> IntakeResult<DocumentVerdict> {
        Err(IntakeError::ClassifierUnavailable("service down".into()))
    }

    fn classify_message(&self, _: &str, _: &str, _: &str) -> IntakeResult<MessageVerdict> {
        Err(IntakeError::ClassifierUnavailable("service down".into()))
    }
}

pub struct SlowClassifier(pub Duration);

impl Classifier for SlowClassifier {
    fn provider(&self) -> &str {
        "slow"
    }

    fn classify_document(&self, _: &Path, _: &str, _: &str) -> IntakeResult<DocumentVerdict> {
        std::thread::sleep(self.0);
        Ok(DocumentVerdict {
            label: "identity".into(),
            fields: ExtractedFields::default(),
        })
    }

    fn classify_message(&self, _: &str, _: &str, _: &str) -> IntakeResult<MessageVerdict> {
        std::thread::sleep(self.0);
        Err(IntakeError::ClassifierUnavailable("too slow".into()))
    }
}
