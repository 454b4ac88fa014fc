//! Deduplicating, encrypting blob store.
//!
//! Blobs are keyed by `(tenant, sha256)` in the store's blob index and sealed
//! on disk as `DIB1 | nonce | AES-256-GCM ciphertext`. Plaintext only ever
//! touches disk through [`ContentStore::stage`], whose temp file is removed
//! when the handle drops.

use crate::error::{IntakeError, IntakeResult};
use crate::intake::model::BlobRecord;
use crate::intake::paths::IntakePaths;
use crate::intake::store::Store;
use crate::intake::util::now_epoch_millis;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tempfile::NamedTempFile;

pub const MASTER_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const BLOB_MAGIC: &[u8; 4] = b"DIB1";
const STAGE_PREFIX: &str = "stage-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub reference: String,
    pub fingerprint: String,
    /// True when the bytes were already on file for this tenant.
    pub deduped: bool,
}

pub struct ContentStore {
    store: Arc<Store>,
    blobs_dir: PathBuf,
    staging_dir: PathBuf,
    key: [u8; MASTER_KEY_LEN],
}

pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn seal(key: &[u8; MASTER_KEY_LEN], plaintext: &[u8]) -> IntakeResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| IntakeError::StorageWriteFailure("invalid master key length".into()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| IntakeError::StorageWriteFailure("encryption failed".into()))?;

    let mut out = Vec::with_capacity(BLOB_MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(BLOB_MAGIC);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open(key: &[u8; MASTER_KEY_LEN], reference: &str, sealed: &[u8]) -> IntakeResult<Vec<u8>> {
    let corrupt = |why: &str| IntakeError::StorageCorrupt(format!("{reference}: {why}"));
    if sealed.len() < BLOB_MAGIC.len() + NONCE_LEN + TAG_LEN {
        return Err(corrupt("truncated"));
    }
    let (magic, rest) = sealed.split_at(BLOB_MAGIC.len());
    if magic != BLOB_MAGIC {
        return Err(corrupt("bad header"));
    }
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| corrupt("invalid master key"))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| corrupt("authentication failed"))
}

fn check_reference(reference: &str) -> IntakeResult<()> {
    let bad = reference.is_empty()
        || reference.starts_with('/')
        || reference.split('/').any(|part| part.is_empty() || part == "..");
    if bad {
        return Err(IntakeError::not_found("blob", reference));
    }
    Ok(())
}

/// `{tenant}/{fingerprint}-{millis}-{nonce}.bin` -> fingerprint.
fn fingerprint_of(reference: &str) -> Option<&str> {
    let name = reference.rsplit('/').next()?;
    name.split_once('-').map(|(fp, _)| fp)
}

fn write_sealed(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("blob path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

impl ContentStore {
    pub fn new(
        store: Arc<Store>,
        blobs_dir: PathBuf,
        staging_dir: PathBuf,
        key: [u8; MASTER_KEY_LEN],
    ) -> Self {
        Self {
            store,
            blobs_dir,
            staging_dir,
            key,
        }
    }

    pub fn blobs_dir(&self) -> &Path {
        &self.blobs_dir
    }

    /// Store `bytes` for `tenant_id`, or return the existing reference when
    /// the tenant already holds the same content.
    pub fn put(&self, tenant_id: u64, bytes: &[u8]) -> IntakeResult<StoredBlob> {
        let fingerprint = fingerprint(bytes);
        if let Some(existing) = self
            .store
            .transaction(|tx| Ok(tx.blob(tenant_id, &fingerprint)))?
        {
            return Ok(StoredBlob {
                reference: existing.storage_ref,
                fingerprint,
                deduped: true,
            });
        }

        // Each writer gets its own file; a losing writer only ever removes
        // what it wrote itself.
        let reference = format!(
            "{tenant_id}/{fingerprint}-{}-{:016x}.bin",
            now_epoch_millis()?,
            OsRng.next_u64()
        );
        let path = self.blobs_dir.join(&reference);
        let sealed = seal(&self.key, bytes)?;
        write_sealed(&path, &sealed).map_err(|err| {
            IntakeError::StorageWriteFailure(format!("{}: {err}", path.display()))
        })?;

        let record = BlobRecord {
            tenant_id,
            fingerprint: fingerprint.clone(),
            storage_ref: reference.clone(),
            size_bytes: bytes.len(),
            created_at: 0,
        };
        // Insert-or-fetch: the index row decides which concurrent writer wins.
        let outcome = self.store.transaction(|tx| {
            if let Some(existing) = tx.blob(tenant_id, &fingerprint) {
                return Ok(Some(existing));
            }
            tx.insert_blob(BlobRecord {
                created_at: tx.now(),
                ..record
            })?;
            Ok(None)
        });

        match outcome {
            Ok(None) => Ok(StoredBlob {
                reference,
                fingerprint,
                deduped: false,
            }),
            Ok(Some(existing)) => {
                let _ = fs::remove_file(&path);
                Ok(StoredBlob {
                    reference: existing.storage_ref,
                    fingerprint,
                    deduped: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(err)
            }
        }
    }

    pub fn get(&self, reference: &str) -> IntakeResult<Vec<u8>> {
        check_reference(reference)?;
        let path = self.blobs_dir.join(reference);
        let sealed = match fs::read(&path) {
            Ok(sealed) => sealed,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(IntakeError::not_found("blob", reference));
            }
            Err(err) => return Err(err.into()),
        };
        let plaintext = open(&self.key, reference, &sealed)?;
        if let Some(expected) = fingerprint_of(reference) {
            if fingerprint(&plaintext) != expected {
                return Err(IntakeError::StorageCorrupt(format!(
                    "{reference}: fingerprint mismatch"
                )));
            }
        }
        Ok(plaintext)
    }

    /// Remove a sealed blob file. Returns false when it was already gone.
    pub fn remove(&self, reference: &str) -> IntakeResult<bool> {
        check_reference(reference)?;
        match fs::remove_file(self.blobs_dir.join(reference)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Write plaintext to a staging file that is deleted when the returned
    /// handle is dropped, on every exit path.
    pub fn stage(&self, bytes: &[u8]) -> IntakeResult<NamedTempFile> {
        fs::create_dir_all(&self.staging_dir)?;
        let mut staged = tempfile::Builder::new()
            .prefix(STAGE_PREFIX)
            .tempfile_in(&self.staging_dir)?;
        staged.write_all(bytes)?;
        staged.flush()?;
        Ok(staged)
    }

    /// Delete staging files at least `max_age_secs` old. Returns how many went.
    pub fn sweep_staging(&self, max_age_secs: u64, now_secs: u64) -> IntakeResult<usize> {
        let entries = match fs::read_dir(&self.staging_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut removed = 0usize;
        for entry in entries {
            let entry = entry?;
            if !entry.file_name().to_string_lossy().starts_with(STAGE_PREFIX) {
                continue;
            }
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if now_secs.saturating_sub(modified) >= max_age_secs {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(removed)
    }
}

pub fn decode_master_key(encoded: &str) -> IntakeResult<[u8; MASTER_KEY_LEN]> {
    let decoded = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|err| IntakeError::InvalidConfig(format!("master key is not base64: {err}")))?;
    if decoded.len() != MASTER_KEY_LEN {
        return Err(IntakeError::InvalidConfig(format!(
            "master key must be {MASTER_KEY_LEN} bytes, got {}",
            decoded.len()
        )));
    }
    let mut key = [0u8; MASTER_KEY_LEN];
    key.copy_from_slice(&decoded);
    Ok(key)
}

fn write_new_file_restricted(path: &Path, data: &[u8]) -> IntakeResult<()> {
    let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
    file.write_all(data)?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// `INTAKE_MASTER_KEY` wins; otherwise the key file, generated on first use.
pub fn load_or_create_master_key(paths: &IntakePaths) -> IntakeResult<[u8; MASTER_KEY_LEN]> {
    if let Ok(encoded) = env::var("INTAKE_MASTER_KEY") {
        if !encoded.trim().is_empty() {
            return decode_master_key(&encoded);
        }
    }

    let key_path = paths.master_key_file();
    if key_path.exists() {
        return decode_master_key(&fs::read_to_string(&key_path)?);
    }

    fs::create_dir_all(&paths.keys_dir)?;
    let mut key = [0u8; MASTER_KEY_LEN];
    OsRng.fill_bytes(&mut key);
    write_new_file_restricted(&key_path, BASE64.encode(key).as_bytes())?;
    tracing::info!(path = %key_path.display(), "generated content store master key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intake::store::NewTenant;
    use crate::intake::model::RetentionPolicy;
    use tempfile::tempdir;

    const KEY: [u8; MASTER_KEY_LEN] = [7u8; MASTER_KEY_LEN];

    fn setup(root: &Path) -> (Arc<Store>, ContentStore, u64, u64) {
        let store = Arc::new(Store::in_memory());
        let (a, b) = store
            .transaction(|tx| {
                let mk = |alias: &str| NewTenant {
                    name: alias.into(),
                    alias: Some(alias.into()),
                    is_default: false,
                    retention: RetentionPolicy::default(),
                };
                let a = tx.insert_tenant(mk("acme"))?;
                let b = tx.insert_tenant(mk("globex"))?;
                Ok((a.id, b.id))
            })
            .expect("tenants");
        let content = ContentStore::new(
            store.clone(),
            root.join("blobs"),
            root.join("staging"),
            KEY,
        );
        (store, content, a, b)
    }

    #[test]
    fn same_bytes_same_tenant_are_stored_once() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, acme, _) = setup(tmp.path());
        let first = content.put(acme, b"payslip bytes").expect("first");
        let second = content.put(acme, b"payslip bytes").expect("second");
        assert!(!first.deduped);
        assert!(second.deduped);
        assert_eq!(first.reference, second.reference);
        assert_eq!(content.get(&first.reference).expect("get"), b"payslip bytes");
    }

    #[test]
    fn other_tenant_gets_its_own_blob() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, acme, globex) = setup(tmp.path());
        let a = content.put(acme, b"same").expect("acme");
        let b = content.put(globex, b"same").expect("globex");
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.reference, b.reference);
        assert!(!b.deduped);
    }

    #[test]
    fn ciphertext_on_disk_is_not_plaintext() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, acme, _) = setup(tmp.path());
        let stored = content.put(acme, b"very secret payslip").expect("put");
        let raw = fs::read(content.blobs_dir().join(&stored.reference)).expect("raw");
        assert!(raw.starts_with(BLOB_MAGIC));
        assert!(!raw.windows(6).any(|w| w == b"secret"));
    }

    #[test]
    fn tampered_blob_reads_as_corrupt() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, acme, _) = setup(tmp.path());
        let stored = content.put(acme, b"payload").expect("put");
        let path = content.blobs_dir().join(&stored.reference);
        let mut raw = fs::read(&path).expect("raw");
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        fs::write(&path, raw).expect("tamper");
        let err = content.get(&stored.reference).expect_err("corrupt");
        assert!(matches!(err, IntakeError::StorageCorrupt(_)));
    }

    #[test]
    fn missing_or_escaping_reference_is_not_found() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, _, _) = setup(tmp.path());
        assert!(matches!(
            content.get("1/abc-1.bin"),
            Err(IntakeError::NotFound { .. })
        ));
        assert!(matches!(
            content.get("../keys/master.key"),
            Err(IntakeError::NotFound { .. })
        ));
    }

    #[test]
    fn concurrent_puts_of_identical_bytes_converge() {
        let tmp = tempdir().expect("tempdir");
        let (store, content, acme, _) = setup(tmp.path());
        let refs: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..6)
                .map(|_| scope.spawn(|| content.put(acme, b"racing bytes").expect("put")))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("join").reference)
                .collect()
        });
        assert!(refs.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(content.get(&refs[0]).expect("winner readable"), b"racing bytes");
        let rows = store
            .transaction(|tx| Ok(tx.blob(acme, &fingerprint(b"racing bytes")).is_some()))
            .expect("read");
        assert!(rows);
        let files = fs::read_dir(content.blobs_dir().join(acme.to_string()))
            .expect("dir")
            .count();
        assert_eq!(files, 1);
    }

    #[test]
    fn losing_writer_never_removes_the_winning_blob() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, acme, _) = setup(tmp.path());
        for round in 0..20u8 {
            let bytes = [b'r', round];
            let refs: Vec<String> = std::thread::scope(|scope| {
                let handles: Vec<_> = (0..8)
                    .map(|_| scope.spawn(|| content.put(acme, &bytes).expect("put")))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("join").reference)
                    .collect()
            });
            assert!(refs.windows(2).all(|w| w[0] == w[1]));
            assert_eq!(content.get(&refs[0]).expect("readable"), bytes);
        }
    }

    #[test]
    fn references_from_one_millisecond_do_not_collide() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, acme, globex) = setup(tmp.path());
        let a = content.put(acme, b"x").expect("acme");
        let b = content.put(globex, b"x").expect("globex");
        let name = |r: &str| r.rsplit('/').next().map(str::to_string);
        assert_ne!(name(&a.reference), name(&b.reference));
        assert_eq!(fingerprint_of(&a.reference), Some(a.fingerprint.as_str()));
    }

    #[test]
    fn staged_plaintext_is_removed_on_drop() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, _, _) = setup(tmp.path());
        let path = {
            let staged = content.stage(b"plaintext").expect("stage");
            let path = staged.path().to_path_buf();
            assert!(path.exists());
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn staging_sweep_removes_only_old_orphans() {
        let tmp = tempdir().expect("tempdir");
        let (_, content, _, _) = setup(tmp.path());
        let orphan = content.stage(b"orphan").expect("stage");
        let (_file, path) = orphan.keep().expect("keep");
        let now = crate::intake::util::now_epoch_secs().expect("now");
        assert_eq!(content.sweep_staging(3600, now).expect("young"), 0);
        assert_eq!(content.sweep_staging(3600, now + 7200).expect("old"), 1);
        assert!(!path.exists());
    }

    #[test]
    fn master_key_must_be_32_bytes() {
        assert!(decode_master_key(&BASE64.encode([1u8; 32])).is_ok());
        assert!(matches!(
            decode_master_key(&BASE64.encode([1u8; 16])),
            Err(IntakeError::InvalidConfig(_))
        ));
    }
}
