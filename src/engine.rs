//! The crypto engine: key lifecycle, authenticated encryption, and MACs.
//!
//! The engine owns one installation master key, persisted through
//! [`SecureStore`] under [`record::ENCRYPTION_KEY`]. It is created lazily on
//! first use and adopted on every later start; it is only ever replaced
//! after an explicit [`CryptoEngine::invalidate`].
//!
//! The master key is never used directly. Two sub-keys are derived from it
//! (see `keys`): one for AES-256-GCM, one for HMAC-SHA256 request signing.

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, MAC_LEN};
use crate::error::{Result, SecurityError};
use crate::keys::{MasterKey, WorkingKeys};
use crate::payload::SealedPayload;
use crate::store::{record, SecureStore};

/// Where the active key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrigin {
    /// Adopted from the store (written earlier by this or another instance).
    Loaded,
    /// Freshly generated and persisted by this call.
    Generated,
    /// Freshly generated but the store rejected it. Usable for this process
    /// only; data sealed with it will not survive a restart.
    Ephemeral,
}

/// The installed key and where it came from.
struct ActiveKey {
    keys: WorkingKeys,
    origin: KeyOrigin,
}

/// Symmetric encryption and MAC service bound to one installation key.
pub struct CryptoEngine {
    store: SecureStore,
    active: RwLock<Option<ActiveKey>>,
}

impl std::fmt::Debug for CryptoEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoEngine")
            .field("ready", &self.is_ready())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Load the persisted master key, or generate and persist a new one.
///
/// Only `NotFound` triggers generation. A record of the wrong length is a
/// corrupted store, not a missing key.
fn load_or_create(store: &SecureStore) -> Result<(MasterKey, KeyOrigin)> {
    match store.load(record::ENCRYPTION_KEY) {
        Ok(bytes) => {
            let bytes = Zeroizing::new(bytes);
            let master = MasterKey::from_slice(&bytes).map_err(|_| {
                SecurityError::StorageFault("stored encryption key is malformed".into())
            })?;
            return Ok((master, KeyOrigin::Loaded));
        }
        Err(SecurityError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    let master = MasterKey::from_bytes(crypto::generate_random_key()?);
    match store.insert_if_absent(record::ENCRYPTION_KEY, master.as_bytes()) {
        Ok(None) => Ok((master, KeyOrigin::Generated)),
        Ok(Some(winner)) => {
            // Another initializer committed first; its key is authoritative.
            let winner = Zeroizing::new(winner);
            let adopted = MasterKey::from_slice(&winner).map_err(|_| {
                SecurityError::StorageFault("stored encryption key is malformed".into())
            })?;
            Ok((adopted, KeyOrigin::Loaded))
        }
        Err(SecurityError::StorageFault(reason)) => {
            warn!(%reason, "encryption key could not be persisted; running with an ephemeral key");
            Ok((master, KeyOrigin::Ephemeral))
        }
        Err(e) => Err(e),
    }
}

async fn load_or_create_blocking(store: SecureStore) -> Result<(MasterKey, KeyOrigin)> {
    tokio::task::spawn_blocking(move || load_or_create(&store))
        .await
        .map_err(|e| SecurityError::StorageFault(format!("key initialization task failed: {e}")))?
}

impl CryptoEngine {
    /// Construct the engine, adopting the persisted key or creating one.
    ///
    /// Storage I/O runs on the blocking pool. A failure to *persist* a new
    /// key does not fail initialization (see [`is_degraded`](Self::is_degraded));
    /// a failure to *read* the store does.
    pub async fn initialize(store: SecureStore) -> Result<Self> {
        let (master, origin) = load_or_create_blocking(store.clone()).await?;
        let engine = Self {
            store,
            active: RwLock::new(None),
        };
        engine.install_if_empty(&master, origin)?;
        Ok(engine)
    }

    /// Install `master` unless a key is already active, returning the origin
    /// of whichever key ends up installed. Check and install happen under
    /// one write guard, so a racer never replaces a key another call
    /// installed.
    fn install_if_empty(&self, master: &MasterKey, origin: KeyOrigin) -> Result<KeyOrigin> {
        let keys = WorkingKeys::derive(master)?;
        let mut active = self.active.write();
        if let Some(current) = active.as_ref() {
            debug!(origin = ?current.origin, "key already active; discarding candidate");
            return Ok(current.origin);
        }
        *active = Some(ActiveKey { keys, origin });
        info!(?origin, "encryption key active");
        Ok(origin)
    }

    /// True when a key is loaded and operations can run.
    pub fn is_ready(&self) -> bool {
        self.active.read().is_some()
    }

    /// True when the active key exists only in memory.
    pub fn is_degraded(&self) -> bool {
        self.active
            .read()
            .as_ref()
            .is_some_and(|active| active.origin == KeyOrigin::Ephemeral)
    }

    /// Origin of the active key, or `None` after [`invalidate`](Self::invalidate).
    pub fn key_origin(&self) -> Option<KeyOrigin> {
        self.active.read().as_ref().map(|active| active.origin)
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SealedPayload> {
        self.encrypt_with_aad(plaintext, &[])
    }

    /// Encrypt `plaintext`, binding `aad` into the authentication tag.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedPayload> {
        let active = self.active.read();
        let keys = &active.as_ref().ok_or(SecurityError::EncryptionError)?.keys;
        let (nonce, ciphertext, tag) = crypto::seal(keys.aead.as_bytes(), aad, plaintext)?;
        Ok(SealedPayload::new(nonce, ciphertext, tag))
    }

    /// Open a payload produced by [`encrypt`](Self::encrypt).
    ///
    /// Any mismatch is a hard `DecryptionError`; nothing is returned for a
    /// payload that fails authentication.
    pub fn decrypt(&self, payload: &SealedPayload) -> Result<Vec<u8>> {
        self.decrypt_with_aad(payload, &[])
    }

    pub fn decrypt_with_aad(&self, payload: &SealedPayload, aad: &[u8]) -> Result<Vec<u8>> {
        let active = self.active.read();
        let keys = &active.as_ref().ok_or(SecurityError::DecryptionError)?.keys;
        crypto::open(
            keys.aead.as_bytes(),
            aad,
            payload.nonce(),
            payload.ciphertext(),
            payload.tag(),
        )
    }

    /// HMAC-SHA256 of `message` under the signing sub-key.
    pub fn mac(&self, message: &[u8]) -> Result<[u8; MAC_LEN]> {
        let active = self.active.read();
        let keys = &active.as_ref().ok_or(SecurityError::EncryptionError)?.keys;
        Ok(crypto::hmac_sha256(keys.mac.as_bytes(), message))
    }

    /// Constant-time check of a tag produced by [`mac`](Self::mac).
    pub fn verify_mac(&self, message: &[u8], tag: &[u8]) -> Result<()> {
        let active = self.active.read();
        let keys = &active.as_ref().ok_or(SecurityError::DecryptionError)?.keys;
        crypto::hmac_sha256_verify(keys.mac.as_bytes(), message, tag)
    }

    /// Forget the key (logout / reset).
    ///
    /// The in-memory key is wiped first, then the persisted record is
    /// removed. Until [`rekey`](Self::rekey) runs, `encrypt` fails with
    /// `EncryptionError` and previously sealed data is unrecoverable.
    pub async fn invalidate(&self) -> Result<()> {
        self.active.write().take();

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.remove(record::ENCRYPTION_KEY))
            .await
            .map_err(|e| SecurityError::StorageFault(format!("key removal task failed: {e}")))??;
        info!("encryption key invalidated");
        Ok(())
    }

    /// Re-run the load-or-generate path after [`invalidate`](Self::invalidate).
    ///
    /// A no-op returning the current origin while a key is active; an
    /// active key is only ever replaced through `invalidate`. Concurrent
    /// callers converge on one key: the store decides the winner when it
    /// accepts writes, the first install does when it does not.
    pub async fn rekey(&self) -> Result<KeyOrigin> {
        if let Some(origin) = self.key_origin() {
            return Ok(origin);
        }
        let (master, candidate) = load_or_create_blocking(self.store.clone()).await?;
        let origin = self.install_if_empty(&master, candidate)?;
        debug!(?origin, "rekey complete");
        Ok(origin)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{BackendError, BackendResult, MemoryBackend, SecretBackend};

    /// Reads succeed (empty), writes fail.
    struct ReadOnlyBackend;

    impl SecretBackend for ReadOnlyBackend {
        fn add(&self, _: &str, _: &str, _: &[u8]) -> BackendResult<()> {
            Err(BackendError::Fault("read-only".into()))
        }
        fn update(&self, _: &str, _: &str, _: &[u8]) -> BackendResult<()> {
            Err(BackendError::Fault("read-only".into()))
        }
        fn fetch(&self, _: &str, _: &str) -> BackendResult<Vec<u8>> {
            Err(BackendError::Missing)
        }
        fn delete(&self, _: &str, _: &str) -> BackendResult<()> {
            Err(BackendError::Missing)
        }
    }

    #[tokio::test]
    async fn test_unpersistable_key_degrades_but_works() {
        let store = SecureStore::new("test", Arc::new(ReadOnlyBackend));
        let engine = CryptoEngine::initialize(store).await.unwrap();

        assert!(engine.is_degraded());
        let sealed = engine.encrypt(b"still works").unwrap();
        assert_eq!(engine.decrypt(&sealed).unwrap(), b"still works");
    }

    #[tokio::test]
    async fn test_concurrent_rekey_keeps_ephemeral_key() {
        let engine = CryptoEngine::initialize(SecureStore::new("test", Arc::new(ReadOnlyBackend)))
            .await
            .unwrap();
        let sealed = engine.encrypt(b"session data").unwrap();

        let (a, b) = tokio::join!(engine.rekey(), engine.rekey());
        assert_eq!(a.unwrap(), KeyOrigin::Ephemeral);
        assert_eq!(b.unwrap(), KeyOrigin::Ephemeral);
        assert_eq!(engine.decrypt(&sealed).unwrap(), b"session data");
    }

    #[test]
    fn test_rekey_racers_after_invalidate_converge() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        let engine = Arc::new(
            rt.block_on(CryptoEngine::initialize(SecureStore::new(
                "test",
                Arc::new(ReadOnlyBackend),
            )))
            .unwrap(),
        );

        rt.block_on(async {
            engine.invalidate().await.unwrap();
            let racers: Vec<_> = (0..8)
                .map(|_| {
                    let engine = engine.clone();
                    tokio::spawn(async move { engine.rekey().await })
                })
                .collect();
            for racer in racers {
                assert_eq!(racer.await.unwrap().unwrap(), KeyOrigin::Ephemeral);
            }
        });

        // A later rekey must not swap the key the racers settled on.
        let sealed = engine.encrypt(b"after race").unwrap();
        assert_eq!(rt.block_on(engine.rekey()).unwrap(), KeyOrigin::Ephemeral);
        assert_eq!(engine.decrypt(&sealed).unwrap(), b"after race");
    }

    #[tokio::test]
    async fn test_rekey_with_active_key_is_a_no_op() {
        let store = SecureStore::new("test", Arc::new(MemoryBackend::new()));
        let engine = CryptoEngine::initialize(store).await.unwrap();
        let origin = engine.key_origin().unwrap();
        let sealed = engine.encrypt(b"kept").unwrap();

        assert_eq!(engine.rekey().await.unwrap(), origin);
        assert_eq!(engine.decrypt(&sealed).unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_malformed_stored_key_is_a_fault() {
        let store = SecureStore::new("test", Arc::new(MemoryBackend::new()));
        store.save(record::ENCRYPTION_KEY, &[1u8; 7]).unwrap();

        let err = CryptoEngine::initialize(store.clone()).await.unwrap_err();
        assert!(matches!(err, SecurityError::StorageFault(_)));
        // The corrupted record is left for inspection, not overwritten.
        assert_eq!(store.load(record::ENCRYPTION_KEY).unwrap(), vec![1u8; 7]);
    }

    #[tokio::test]
    async fn test_mac_is_not_the_raw_master_hmac() {
        let store = SecureStore::new("test", Arc::new(MemoryBackend::new()));
        let engine = CryptoEngine::initialize(store.clone()).await.unwrap();
        let master: [u8; 32] = store
            .load(record::ENCRYPTION_KEY)
            .unwrap()
            .try_into()
            .unwrap();

        let tag = engine.mac(b"GET:/v1/scan").unwrap();
        assert_ne!(tag, crypto::hmac_sha256(&master, b"GET:/v1/scan"));
    }
}
