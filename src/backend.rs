//! Platform secure-storage backends.
//!
//! A [`SecretBackend`] is the platform capability underneath
//! [`SecureStore`](crate::store::SecureStore): an app-scoped key/value store
//! that supports add / update / fetch / delete by `(namespace, key)`, the
//! same contract a Keychain or Android Keystore exposes. Backends do not
//! implement upsert themselves; that policy lives in the store.
//!
//! Provided implementations:
//! - [`MemoryBackend`]: process-local, for tests and ephemeral sessions.
//! - [`FileBackend`]: a JSON document rewritten atomically on every change.
//! - `KeyringBackend` (feature `keyring`): the OS credential store.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// `add` found an existing record.
    #[error("record already exists")]
    Duplicate,
    /// `update`, `fetch` or `delete` found no record.
    #[error("record not found")]
    Missing,
    /// The underlying storage is unavailable or corrupted.
    #[error("backend fault: {0}")]
    Fault(String),
}

/// Outcome of a backend call.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Platform secure storage.
pub trait SecretBackend: Send + Sync {
    /// Insert a new record. Must fail with `Duplicate` rather than overwrite.
    fn add(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Replace the value of an existing record.
    fn update(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()>;

    /// Read a record's value.
    fn fetch(&self, namespace: &str, key: &str) -> BackendResult<Vec<u8>>;

    /// Delete a record.
    fn delete(&self, namespace: &str, key: &str) -> BackendResult<()>;
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// In-memory backend. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all namespaces.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl SecretBackend for MemoryBackend {
    fn add(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        let mut records = self.records.lock();
        let id = (namespace.to_string(), key.to_string());
        if records.contains_key(&id) {
            return Err(BackendError::Duplicate);
        }
        records.insert(id, value.to_vec());
        Ok(())
    }

    fn update(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        let mut records = self.records.lock();
        match records.get_mut(&(namespace.to_string(), key.to_string())) {
            Some(slot) => {
                *slot = value.to_vec();
                Ok(())
            }
            None => Err(BackendError::Missing),
        }
    }

    fn fetch(&self, namespace: &str, key: &str) -> BackendResult<Vec<u8>> {
        self.records
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned()
            .ok_or(BackendError::Missing)
    }

    fn delete(&self, namespace: &str, key: &str) -> BackendResult<()> {
        self.records
            .lock()
            .remove(&(namespace.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or(BackendError::Missing)
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// On-disk layout: namespace -> key -> base64 value.
#[derive(Serialize, Deserialize)]
struct FileDocument {
    version: u32,
    records: BTreeMap<String, BTreeMap<String, String>>,
}

const FILE_FORMAT_VERSION: u32 = 1;

/// Backend persisted as a single JSON file.
///
/// Every mutation writes the full document to a temporary file in the same
/// directory and renames it over the original, so a crash leaves either the
/// old or the new document on disk. A document that fails to parse is
/// reported as a fault and left untouched.
///
/// Values are stored base64-encoded but otherwise unprotected; secrets
/// written through this backend should already be sealed, or the file should
/// live in an OS-protected location.
pub struct FileBackend {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    /// Open (or lazily create) the document at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> BackendResult<FileDocument> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileDocument {
                    version: FILE_FORMAT_VERSION,
                    records: BTreeMap::new(),
                })
            }
            Err(e) => return Err(BackendError::Fault(format!("read store: {e}"))),
        };
        let doc: FileDocument = serde_json::from_slice(&raw)
            .map_err(|e| BackendError::Fault(format!("corrupted store: {e}")))?;
        if doc.version != FILE_FORMAT_VERSION {
            return Err(BackendError::Fault(format!(
                "unsupported store version {}",
                doc.version
            )));
        }
        Ok(doc)
    }

    fn write(&self, doc: &FileDocument) -> BackendResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| BackendError::Fault(format!("create dir: {e}")))?;

        let encoded = serde_json::to_vec_pretty(doc)
            .map_err(|e| BackendError::Fault(format!("encode store: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| BackendError::Fault(format!("temp file: {e}")))?;
        tmp.write_all(&encoded)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| BackendError::Fault(format!("write store: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| BackendError::Fault(format!("replace store: {}", e.error)))?;
        Ok(())
    }

    fn decode(value: &str) -> BackendResult<Vec<u8>> {
        general_purpose::STANDARD
            .decode(value)
            .map_err(|e| BackendError::Fault(format!("corrupted record: {e}")))
    }
}

impl SecretBackend for FileBackend {
    fn add(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        let _guard = self.lock.lock();
        let mut doc = self.read()?;
        let ns = doc.records.entry(namespace.to_string()).or_default();
        if ns.contains_key(key) {
            return Err(BackendError::Duplicate);
        }
        ns.insert(key.to_string(), general_purpose::STANDARD.encode(value));
        self.write(&doc)
    }

    fn update(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        let _guard = self.lock.lock();
        let mut doc = self.read()?;
        let slot = doc
            .records
            .get_mut(namespace)
            .and_then(|ns| ns.get_mut(key))
            .ok_or(BackendError::Missing)?;
        *slot = general_purpose::STANDARD.encode(value);
        self.write(&doc)
    }

    fn fetch(&self, namespace: &str, key: &str) -> BackendResult<Vec<u8>> {
        let _guard = self.lock.lock();
        let doc = self.read()?;
        let value = doc
            .records
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .ok_or(BackendError::Missing)?;
        Self::decode(value)
    }

    fn delete(&self, namespace: &str, key: &str) -> BackendResult<()> {
        let _guard = self.lock.lock();
        let mut doc = self.read()?;
        let ns = doc.records.get_mut(namespace).ok_or(BackendError::Missing)?;
        ns.remove(key).ok_or(BackendError::Missing)?;
        if ns.is_empty() {
            doc.records.remove(namespace);
        }
        self.write(&doc)
    }
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

/// OS credential store backend (macOS/iOS Keychain, Secret Service,
/// Windows Credential Manager). Service = namespace, account = key.
///
/// The keyring has no create-only primitive, so `add` is a check-then-set
/// and only guards against racers inside this process (the store's write
/// lock); another process writing the same account can still interleave.
#[cfg(feature = "keyring")]
#[derive(Default)]
pub struct KeyringBackend;

#[cfg(feature = "keyring")]
impl KeyringBackend {
    pub fn new() -> Self {
        Self
    }

    fn entry(namespace: &str, key: &str) -> BackendResult<keyring::Entry> {
        keyring::Entry::new(namespace, key)
            .map_err(|e| BackendError::Fault(format!("keyring init: {e}")))
    }

    fn map_err(e: keyring::Error) -> BackendError {
        match e {
            keyring::Error::NoEntry => BackendError::Missing,
            other => BackendError::Fault(format!("keyring: {other}")),
        }
    }
}

#[cfg(feature = "keyring")]
impl SecretBackend for KeyringBackend {
    fn add(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        match self.fetch(namespace, key) {
            Ok(_) => Err(BackendError::Duplicate),
            Err(BackendError::Missing) => Self::entry(namespace, key)?
                .set_password(&general_purpose::STANDARD.encode(value))
                .map_err(Self::map_err),
            Err(e) => Err(e),
        }
    }

    fn update(&self, namespace: &str, key: &str, value: &[u8]) -> BackendResult<()> {
        self.fetch(namespace, key)?;
        Self::entry(namespace, key)?
            .set_password(&general_purpose::STANDARD.encode(value))
            .map_err(Self::map_err)
    }

    fn fetch(&self, namespace: &str, key: &str) -> BackendResult<Vec<u8>> {
        let encoded = Self::entry(namespace, key)?
            .get_password()
            .map_err(Self::map_err)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| BackendError::Fault(format!("corrupted record: {e}")))
    }

    fn delete(&self, namespace: &str, key: &str) -> BackendResult<()> {
        Self::entry(namespace, key)?
            .delete_password()
            .map_err(Self::map_err)
    }
}
