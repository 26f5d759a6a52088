//! Encrypted application state.
//!
//! Small typed values (scan counters, last-scan date, premium status,
//! achievements) kept at rest under the engine's key. Each record is JSON,
//! sealed with the record key as associated data so a ciphertext copied to
//! another key fails authentication, and persisted through [`SecureStore`].

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::engine::CryptoEngine;
use crate::error::{Result, SecurityError};
use crate::payload::SealedPayload;
use crate::store::SecureStore;

/// Typed, sealed key/value records.
#[derive(Debug, Clone)]
pub struct SealedState {
    engine: Arc<CryptoEngine>,
    store: SecureStore,
}

fn storage_key(key: &str) -> String {
    format!("state.{key}")
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.chars().any(char::is_control) {
        return Err(SecurityError::Config(format!("invalid state key {key:?}")));
    }
    Ok(())
}

impl SealedState {
    pub fn new(engine: Arc<CryptoEngine>, store: SecureStore) -> Self {
        Self { engine, store }
    }

    /// Seal and persist `value` under `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        check_key(key)?;
        let json = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| SecurityError::Serialization(e.to_string()))?,
        );
        let sealed = self.engine.encrypt_with_aad(&json, key.as_bytes())?;
        self.store.save(&storage_key(key), &sealed.to_bytes())?;
        debug!(key, "state record sealed");
        Ok(())
    }

    /// Read and open the value under `key`.
    ///
    /// `Ok(None)` when nothing is stored. A record that fails authentication
    /// is `DecryptionError`, never a silent default.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        check_key(key)?;
        let Some(bytes) = self.store.load_optional(&storage_key(key))? else {
            return Ok(None);
        };
        let sealed = SealedPayload::from_bytes(&bytes)?;
        let json = Zeroizing::new(self.engine.decrypt_with_aad(&sealed, key.as_bytes()).map_err(
            |e| {
                warn!(key, "state record failed authentication");
                e
            },
        )?);
        serde_json::from_slice(&json)
            .map(Some)
            .map_err(|e| SecurityError::Serialization(e.to_string()))
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        check_key(key)?;
        self.store.remove(&storage_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_keys_rejected() {
        assert!(check_key("").is_err());
        assert!(check_key("scan\ncount").is_err());
        assert!(check_key("scan_count").is_ok());
    }

    #[test]
    fn test_storage_key_is_prefixed() {
        assert_eq!(storage_key("premium_status"), "state.premium_status");
    }
}
