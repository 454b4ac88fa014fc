//! Transactional repository for tenants, dossiers, messages, documents and
//! their links.
//!
//! Every read and write goes through [`Store::transaction`]. The closure runs
//! against a working copy of the tables while the store mutex is held (and,
//! for the file backend, an exclusive `fs2` lock on `intake.lock`), so
//! transactions are serializable across threads and processes. The copy
//! replaces the committed tables only when the closure returns `Ok`; the file
//! backend then writes the snapshot to a temp file and renames it into place.
//!
//! Unique indexes are checked at insert time and surface as
//! [`IntakeError::Conflict`].

use crate::error::{IntakeError, IntakeResult};
use crate::intake::model::{
    BlobRecord, Checklist, DocCategory, Document, DocumentLink, Dossier, DossierStatus,
    ExtractedFields, Message, MessageLink, RetentionPolicy, Tenant,
};
use crate::intake::util::now_epoch_secs;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_VERSION: u32 = 1;
const SNAPSHOT_FILE: &str = "intake.json";
const LOCK_FILE: &str = "intake.lock";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Sequences {
    pub tenant: u64,
    pub dossier: u64,
    pub message: u64,
    pub document: u64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            tenant: 1,
            dossier: 1,
            message: 1,
            document: 1,
        }
    }
}

fn take_next(seq: &mut u64) -> u64 {
    let id = *seq;
    *seq += 1;
    id
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tables {
    pub schema_version: u32,
    pub sequences: Sequences,
    pub tenants: BTreeMap<u64, Tenant>,
    pub dossiers: BTreeMap<u64, Dossier>,
    pub messages: BTreeMap<u64, Message>,
    pub documents: BTreeMap<u64, Document>,
    pub blobs: Vec<BlobRecord>,
    pub message_links: Vec<MessageLink>,
    pub document_links: Vec<DocumentLink>,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            sequences: Sequences::default(),
            tenants: BTreeMap::new(),
            dossiers: BTreeMap::new(),
            messages: BTreeMap::new(),
            documents: BTreeMap::new(),
            blobs: Vec::new(),
            message_links: Vec::new(),
            document_links: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub alias: Option<String>,
    pub is_default: bool,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub tenant_id: u64,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub urgency: String,
    pub summary: String,
    pub suggested_title: String,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub tenant_id: u64,
    pub fingerprint: String,
    pub storage_ref: String,
    pub filename: String,
    pub mime: String,
    pub category: DocCategory,
    pub raw_label: String,
    pub classified_by: String,
    pub fields: ExtractedFields,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub tenants: usize,
    pub dossiers: usize,
    pub messages: usize,
    pub documents: usize,
    pub blobs: usize,
}

pub struct Tx<'a> {
    tables: &'a mut Tables,
    now: u64,
    dirty: bool,
}

impl<'a> Tx<'a> {
    pub fn now(&self) -> u64 {
        self.now
    }

    // --- tenants ---

    pub fn tenants(&self) -> Vec<Tenant> {
        self.tables.tenants.values().cloned().collect()
    }

    pub fn tenant(&self, id: u64) -> IntakeResult<Tenant> {
        self.tables
            .tenants
            .get(&id)
            .cloned()
            .ok_or_else(|| IntakeError::not_found("tenant", id))
    }

    pub fn tenant_by_alias(&self, alias: &str) -> Option<Tenant> {
        let wanted = alias.trim().to_ascii_lowercase();
        self.tables
            .tenants
            .values()
            .find(|t| t.alias.as_deref() == Some(wanted.as_str()))
            .cloned()
    }

    pub fn insert_tenant(&mut self, new: NewTenant) -> IntakeResult<Tenant> {
        let alias = new
            .alias
            .map(|a| a.trim().to_ascii_lowercase())
            .filter(|a| !a.is_empty());
        if let Some(alias) = alias.as_deref() {
            if self.tenant_by_alias(alias).is_some() {
                return Err(IntakeError::Conflict(format!(
                    "tenant alias `{alias}` already taken"
                )));
            }
        }
        if new.is_default {
            for tenant in self.tables.tenants.values_mut() {
                tenant.is_default = false;
            }
        }
        let tenant = Tenant {
            id: take_next(&mut self.tables.sequences.tenant),
            name: new.name,
            alias,
            is_default: new.is_default,
            retention: new.retention,
            created_at: self.now,
        };
        self.tables.tenants.insert(tenant.id, tenant.clone());
        self.dirty = true;
        Ok(tenant)
    }

    // --- dossiers ---

    /// Case-insensitive lookup of the dossier for `(tenant_id, email)`.
    pub fn find_dossier(&self, tenant_id: u64, email: &str) -> Option<Dossier> {
        self.tables
            .dossiers
            .values()
            .find(|d| {
                d.tenant_id == tenant_id
                    && d.email
                        .as_deref()
                        .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned()
    }

    pub fn insert_dossier(
        &mut self,
        tenant_id: u64,
        email: Option<String>,
        display_name: Option<String>,
    ) -> IntakeResult<Dossier> {
        self.tenant(tenant_id)?;
        if let Some(email) = email.as_deref() {
            if self.find_dossier(tenant_id, email).is_some() {
                return Err(IntakeError::Conflict(format!(
                    "dossier for `{email}` already exists in tenant {tenant_id}"
                )));
            }
        }
        let dossier = Dossier {
            id: take_next(&mut self.tables.sequences.dossier),
            tenant_id,
            email,
            display_name,
            checklist: Checklist::default(),
            status: DossierStatus::New,
            risk_flags: Vec::new(),
            closed_at: None,
            anonymized_at: None,
            created_at: self.now,
            updated_at: self.now,
        };
        self.tables.dossiers.insert(dossier.id, dossier.clone());
        self.dirty = true;
        Ok(dossier)
    }

    pub fn dossier(&self, id: u64) -> IntakeResult<Dossier> {
        self.tables
            .dossiers
            .get(&id)
            .cloned()
            .ok_or_else(|| IntakeError::not_found("dossier", id))
    }

    pub fn update_dossier(&mut self, mut dossier: Dossier) -> IntakeResult<Dossier> {
        let Some(current) = self.tables.dossiers.get(&dossier.id) else {
            return Err(IntakeError::not_found("dossier", dossier.id));
        };
        if let Some(email) = dossier.email.as_deref() {
            let changed = current
                .email
                .as_deref()
                .is_none_or(|old| !old.eq_ignore_ascii_case(email));
            if changed {
                if let Some(other) = self.find_dossier(dossier.tenant_id, email) {
                    if other.id != dossier.id {
                        return Err(IntakeError::Conflict(format!(
                            "dossier for `{email}` already exists in tenant {}",
                            dossier.tenant_id
                        )));
                    }
                }
            }
        }
        dossier.updated_at = self.now;
        self.tables.dossiers.insert(dossier.id, dossier.clone());
        self.dirty = true;
        Ok(dossier)
    }

    pub fn dossiers_for_tenant(&self, tenant_id: u64) -> Vec<Dossier> {
        self.tables
            .dossiers
            .values()
            .filter(|d| d.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    // --- messages ---

    pub fn insert_message(&mut self, new: NewMessage) -> IntakeResult<Message> {
        self.tenant(new.tenant_id)?;
        let message = Message {
            id: take_next(&mut self.tables.sequences.message),
            tenant_id: new.tenant_id,
            sender: new.sender,
            subject: new.subject,
            body: new.body,
            category: new.category,
            urgency: new.urgency,
            summary: new.summary,
            suggested_title: new.suggested_title,
            reply_sent: false,
            created_at: self.now,
        };
        self.tables.messages.insert(message.id, message.clone());
        self.dirty = true;
        Ok(message)
    }

    pub fn message(&self, id: u64) -> IntakeResult<Message> {
        self.tables
            .messages
            .get(&id)
            .cloned()
            .ok_or_else(|| IntakeError::not_found("message", id))
    }

    pub fn mark_reply_sent(&mut self, id: u64) -> IntakeResult<()> {
        let message = self
            .tables
            .messages
            .get_mut(&id)
            .ok_or_else(|| IntakeError::not_found("message", id))?;
        message.reply_sent = true;
        self.dirty = true;
        Ok(())
    }

    pub fn messages_created_before(&self, tenant_id: u64, cutoff: u64) -> Vec<u64> {
        self.tables
            .messages
            .values()
            .filter(|m| m.tenant_id == tenant_id && m.created_at < cutoff)
            .map(|m| m.id)
            .collect()
    }

    /// Deletes the message and its link rows; returns the dossiers it was linked to.
    pub fn delete_message(&mut self, id: u64) -> IntakeResult<Vec<u64>> {
        if self.tables.messages.remove(&id).is_none() {
            return Err(IntakeError::not_found("message", id));
        }
        let mut dossiers = Vec::new();
        self.tables.message_links.retain(|link| {
            if link.message_id == id {
                dossiers.push(link.dossier_id);
                false
            } else {
                true
            }
        });
        self.dirty = true;
        Ok(dossiers)
    }

    // --- documents ---

    pub fn document(&self, id: u64) -> IntakeResult<Document> {
        self.tables
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| IntakeError::not_found("document", id))
    }

    pub fn document_by_fingerprint(&self, tenant_id: u64, fingerprint: &str) -> Option<Document> {
        self.tables
            .documents
            .values()
            .find(|d| d.tenant_id == tenant_id && d.fingerprint == fingerprint)
            .cloned()
    }

    pub fn insert_document(&mut self, new: NewDocument) -> IntakeResult<Document> {
        self.tenant(new.tenant_id)?;
        if self
            .document_by_fingerprint(new.tenant_id, &new.fingerprint)
            .is_some()
        {
            return Err(IntakeError::Conflict(format!(
                "document {} already exists in tenant {}",
                new.fingerprint, new.tenant_id
            )));
        }
        let document = Document {
            id: take_next(&mut self.tables.sequences.document),
            tenant_id: new.tenant_id,
            fingerprint: new.fingerprint,
            storage_ref: new.storage_ref,
            filename: new.filename,
            mime: new.mime,
            category: new.category,
            raw_label: new.raw_label,
            classified_by: new.classified_by,
            fields: new.fields,
            created_at: self.now,
        };
        self.tables.documents.insert(document.id, document.clone());
        self.dirty = true;
        Ok(document)
    }

    pub fn documents_created_before(&self, tenant_id: u64, cutoff: u64) -> Vec<u64> {
        self.tables
            .documents
            .values()
            .filter(|d| d.tenant_id == tenant_id && d.created_at < cutoff)
            .map(|d| d.id)
            .collect()
    }

    /// Deletes the document and its link rows; returns it with the dossiers
    /// it was linked to.
    pub fn delete_document(&mut self, id: u64) -> IntakeResult<(Document, Vec<u64>)> {
        let Some(document) = self.tables.documents.remove(&id) else {
            return Err(IntakeError::not_found("document", id));
        };
        let mut dossiers = Vec::new();
        self.tables.document_links.retain(|link| {
            if link.document_id == id {
                dossiers.push(link.dossier_id);
                false
            } else {
                true
            }
        });
        self.dirty = true;
        Ok((document, dossiers))
    }

    // --- blobs ---

    pub fn blob(&self, tenant_id: u64, fingerprint: &str) -> Option<BlobRecord> {
        self.tables
            .blobs
            .iter()
            .find(|b| b.tenant_id == tenant_id && b.fingerprint == fingerprint)
            .cloned()
    }

    pub fn insert_blob(&mut self, record: BlobRecord) -> IntakeResult<()> {
        if self.blob(record.tenant_id, &record.fingerprint).is_some() {
            return Err(IntakeError::Conflict(format!(
                "blob {} already stored for tenant {}",
                record.fingerprint, record.tenant_id
            )));
        }
        self.tables.blobs.push(record);
        self.dirty = true;
        Ok(())
    }

    pub fn delete_blob(&mut self, tenant_id: u64, fingerprint: &str) -> Option<BlobRecord> {
        let idx = self
            .tables
            .blobs
            .iter()
            .position(|b| b.tenant_id == tenant_id && b.fingerprint == fingerprint)?;
        self.dirty = true;
        Some(self.tables.blobs.remove(idx))
    }

    // --- links ---

    pub fn has_message_link(&self, dossier_id: u64, message_id: u64) -> bool {
        self.tables
            .message_links
            .iter()
            .any(|l| l.dossier_id == dossier_id && l.message_id == message_id)
    }

    pub fn insert_message_link(&mut self, dossier_id: u64, message_id: u64) -> IntakeResult<()> {
        if self.has_message_link(dossier_id, message_id) {
            return Err(IntakeError::Conflict(format!(
                "message {message_id} already linked to dossier {dossier_id}"
            )));
        }
        self.tables.message_links.push(MessageLink {
            dossier_id,
            message_id,
        });
        self.dirty = true;
        Ok(())
    }

    pub fn message_ids_for(&self, dossier_id: u64) -> Vec<u64> {
        self.tables
            .message_links
            .iter()
            .filter(|l| l.dossier_id == dossier_id)
            .map(|l| l.message_id)
            .collect()
    }

    pub fn document_links_for(&self, dossier_id: u64) -> Vec<DocumentLink> {
        self.tables
            .document_links
            .iter()
            .filter(|l| l.dossier_id == dossier_id)
            .copied()
            .collect()
    }

    pub fn insert_document_link(&mut self, link: DocumentLink) -> IntakeResult<()> {
        for existing in self
            .tables
            .document_links
            .iter()
            .filter(|l| l.dossier_id == link.dossier_id)
        {
            if existing.document_id == link.document_id {
                return Err(IntakeError::Conflict(format!(
                    "document {} already linked to dossier {}",
                    link.document_id, link.dossier_id
                )));
            }
            if existing.category == link.category {
                return Err(IntakeError::Conflict(format!(
                    "dossier {} already holds a {} document",
                    link.dossier_id, link.category
                )));
            }
        }
        self.tables.document_links.push(link);
        self.dirty = true;
        Ok(())
    }

    pub fn delete_document_link(&mut self, dossier_id: u64, document_id: u64) -> bool {
        let before = self.tables.document_links.len();
        self.tables
            .document_links
            .retain(|l| !(l.dossier_id == dossier_id && l.document_id == document_id));
        let removed = self.tables.document_links.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            tenants: self.tables.tenants.len(),
            dossiers: self.tables.dossiers.len(),
            messages: self.tables.messages.len(),
            documents: self.tables.documents.len(),
            blobs: self.tables.blobs.len(),
        }
    }

    #[cfg(test)]
    pub fn tables_mut(&mut self) -> &mut Tables {
        self.dirty = true;
        self.tables
    }
}

enum Backend {
    #[cfg_attr(not(test), allow(dead_code))]
    Memory,
    File { snapshot: PathBuf, lock: PathBuf },
}

pub struct Store {
    backend: Backend,
    tables: Mutex<Tables>,
}

fn read_snapshot(path: &Path) -> IntakeResult<Tables> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|err| {
        IntakeError::StoreUnavailable(format!("snapshot {} is corrupt: {err}", path.display()))
    })
}

fn write_snapshot(path: &Path, tables: &Tables) -> IntakeResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| IntakeError::StoreUnavailable("snapshot has no parent dir".into()))?;
    let data = serde_json::to_string_pretty(tables)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| IntakeError::Io(err.error))?;
    Ok(())
}

impl Store {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn open(state_dir: &Path) -> IntakeResult<Self> {
        fs::create_dir_all(state_dir)?;
        let snapshot = state_dir.join(SNAPSHOT_FILE);
        let tables = if snapshot.exists() {
            read_snapshot(&snapshot)?
        } else {
            Tables::default()
        };
        Ok(Self {
            backend: Backend::File {
                snapshot,
                lock: state_dir.join(LOCK_FILE),
            },
            tables: Mutex::new(tables),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Memory => None,
            Backend::File { snapshot, .. } => Some(snapshot),
        }
    }

    pub fn transaction<T, F>(&self, f: F) -> IntakeResult<T>
    where
        F: FnOnce(&mut Tx<'_>) -> IntakeResult<T>,
    {
        let mut guard = self
            .tables
            .lock()
            .map_err(|_| IntakeError::StoreUnavailable("store mutex poisoned".into()))?;

        let lock_file: Option<File> = match &self.backend {
            Backend::Memory => None,
            Backend::File { snapshot, lock } => {
                let file = OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .open(lock)?;
                file.lock_exclusive()?;
                // Another process may have committed since our last look.
                if snapshot.exists() {
                    *guard = read_snapshot(snapshot)?;
                }
                Some(file)
            }
        };

        let mut working = guard.clone();
        let now = now_epoch_secs()?;
        let (out, dirty) = {
            let mut tx = Tx {
                tables: &mut working,
                now,
                dirty: false,
            };
            let out = f(&mut tx);
            (out, tx.dirty)
        };

        let out = out?;
        if dirty {
            if let Backend::File { snapshot, .. } = &self.backend {
                write_snapshot(snapshot, &working)?;
            }
            *guard = working;
        }
        if let Some(file) = lock_file {
            FileExt::unlock(&file)?;
        }
        Ok(out)
    }
}
