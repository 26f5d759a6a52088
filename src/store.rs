//! Namespaced secret storage.
//!
//! `SecureStore` turns a platform [`SecretBackend`] into the upsert contract
//! every other component relies on: at most one live record per
//! `(namespace, key)`, writes replace rather than append, and storage faults
//! are surfaced to the caller instead of being swallowed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::{BackendError, SecretBackend};
use crate::error::{Result, SecurityError};

/// Well-known record keys.
pub mod record {
    /// The persisted master secret owned by `CryptoEngine`.
    pub const ENCRYPTION_KEY: &str = "encryption_key";
    /// Bearer token attached to outbound requests.
    pub const AUTH_TOKEN: &str = "auth_token";
    /// PBKDF2 verifier for the fallback authentication secret.
    pub const AUTH_FALLBACK: &str = "auth_fallback";
}

/// Durable, namespaced key/value storage for small secrets.
///
/// Cheap to clone; clones share the backend and the write lock.
#[derive(Clone)]
pub struct SecureStore {
    inner: Arc<Inner>,
}

struct Inner {
    namespace: String,
    backend: Arc<dyn SecretBackend>,
    // Serialises writes so the add-then-update sequence is atomic with
    // respect to other writers in this process.
    write_lock: Mutex<()>,
}

impl fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureStore")
            .field("namespace", &self.inner.namespace)
            .finish_non_exhaustive()
    }
}

/// add/update rounds `save` makes before giving up on a record that keeps
/// being deleted by another process.
const WRITE_ATTEMPTS: usize = 4;

fn fault(key: &str, e: BackendError) -> SecurityError {
    match e {
        BackendError::Missing => SecurityError::NotFound(key.to_string()),
        BackendError::Duplicate => {
            SecurityError::StorageFault(format!("unexpected duplicate record {key}"))
        }
        BackendError::Fault(msg) => SecurityError::StorageFault(msg),
    }
}

impl SecureStore {
    /// Create a store over `backend`, scoping every record to `namespace`.
    pub fn new(namespace: impl Into<String>, backend: Arc<dyn SecretBackend>) -> Self {
        Self {
            inner: Arc::new(Inner {
                namespace: namespace.into(),
                backend,
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Insert or replace the record for `key`.
    pub fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        let ns = &self.inner.namespace;
        let backend = &self.inner.backend;
        let _guard = self.inner.write_lock.lock();

        for _ in 0..WRITE_ATTEMPTS {
            match backend.add(ns, key, data) {
                Ok(()) => {
                    debug!(key, len = data.len(), "secret saved");
                    return Ok(());
                }
                Err(BackendError::Duplicate) => {}
                Err(e) => {
                    warn!(key, "secure store write failed");
                    return Err(fault(key, e));
                }
            }
            match backend.update(ns, key, data) {
                Ok(()) => {
                    debug!(key, len = data.len(), "secret replaced");
                    return Ok(());
                }
                // Deleted by another process between add and update.
                Err(BackendError::Missing) => continue,
                Err(e) => {
                    warn!(key, "secure store write failed");
                    return Err(fault(key, e));
                }
            }
        }
        warn!(key, "record kept changing during write");
        Err(SecurityError::StorageFault(format!(
            "record {key} changed concurrently during write"
        )))
    }

    /// Insert `data` only if no record exists for `key`.
    ///
    /// Returns `None` when this call created the record, or the value that
    /// was already present.
    pub fn insert_if_absent(&self, key: &str, data: &[u8]) -> Result<Option<Vec<u8>>> {
        let ns = &self.inner.namespace;
        let backend = &self.inner.backend;
        let _guard = self.inner.write_lock.lock();

        match backend.add(ns, key, data) {
            Ok(()) => {
                debug!(key, "secret created");
                Ok(None)
            }
            Err(BackendError::Duplicate) => backend.fetch(ns, key).map(Some).map_err(|e| fault(key, e)),
            Err(e) => Err(fault(key, e)),
        }
    }

    /// Read the current value for `key`, or `NotFound`.
    pub fn load(&self, key: &str) -> Result<Vec<u8>> {
        self.inner
            .backend
            .fetch(&self.inner.namespace, key)
            .map_err(|e| fault(key, e))
    }

    /// Like [`load`](Self::load) but maps absence to `None`.
    pub fn load_optional(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.load(key) {
            Ok(v) => Ok(Some(v)),
            Err(SecurityError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.load_optional(key).map(|v| v.is_some())
    }

    /// Delete the record for `key`. Removing an absent record is a no-op.
    pub fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.inner.write_lock.lock();
        match self.inner.backend.delete(&self.inner.namespace, key) {
            Ok(()) => {
                debug!(key, "secret removed");
                Ok(())
            }
            Err(BackendError::Missing) => Ok(()),
            Err(e) => Err(fault(key, e)),
        }
    }
}
