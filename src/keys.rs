//! Key derivation and ownership.
//!
//! This module owns two responsibilities:
//! 1. Holding the installation's master secret in a type that is opaque,
//!    non-cloneable, and zeroised on drop.
//! 2. Deriving the two working sub-keys (AEAD and MAC) from it with
//!    HKDF-SHA256, so that encryption and request signing never share raw
//!    key material.
//!
//! ## Derivation structure
//!
//! ```text
//! HKDF-SHA256(
//!     ikm  = master_key,
//!     salt = None,
//!     info = "scanshield/v1/{purpose}"
//! )
//! ```

use ring::hkdf;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::KEY_LEN;
use crate::error::{Result, SecurityError};

/// HKDF info labels for each sub-key.
pub(crate) mod purpose {
    pub const AEAD: &str = "scanshield/v1/aead";
    pub const MAC: &str = "scanshield/v1/mac";
}

// ---------------------------------------------------------------------------
// Master key
// ---------------------------------------------------------------------------

/// The persisted 256-bit installation secret.
///
/// - Not `Clone`.
/// - Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Construct a `MasterKey` from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Construct a `MasterKey` from a stored record, which must be exactly
    /// 32 bytes.
    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| SecurityError::InvalidKey)?;
        Ok(Self { bytes })
    }

    /// Borrow the raw key bytes. Only used to persist the key and to derive
    /// sub-keys; raw bytes never leave the crate.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Derived keys
// ---------------------------------------------------------------------------

/// A sub-key derived for one purpose. Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct DerivedKey {
    bytes: [u8; KEY_LEN],
}

impl DerivedKey {
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

/// The pair of working keys held by the engine while a master key is active.
pub(crate) struct WorkingKeys {
    pub(crate) aead: DerivedKey,
    pub(crate) mac: DerivedKey,
}

impl WorkingKeys {
    pub(crate) fn derive(master: &MasterKey) -> Result<Self> {
        Ok(Self {
            aead: derive_key(master, purpose::AEAD)?,
            mac: derive_key(master, purpose::MAC)?,
        })
    }
}

/// Derive a key for a specific purpose label.
///
/// Different labels produce statistically independent outputs; knowing one
/// derived key reveals nothing about the master key or the other sub-key.
pub(crate) fn derive_key(master: &MasterKey, label: &str) -> Result<DerivedKey> {
    // An empty salt is treated by HKDF as a zero-filled salt of hash length.
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &[]);
    let prk = salt.extract(master.as_bytes());

    let info = [label.as_bytes()];
    let okm = prk
        .expand(&info, hkdf::HKDF_SHA256)
        .map_err(|_| SecurityError::KeyDerivationFailure)?;

    let mut derived = [0u8; KEY_LEN];
    okm.fill(&mut derived)
        .map_err(|_| SecurityError::KeyDerivationFailure)?;

    Ok(DerivedKey { bytes: derived })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subkeys_are_independent() {
        let master = MasterKey::from_bytes([9u8; KEY_LEN]);
        let keys = WorkingKeys::derive(&master).unwrap();
        assert_ne!(keys.aead.as_bytes(), keys.mac.as_bytes());
        assert_ne!(keys.aead.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_key(&MasterKey::from_bytes([3u8; KEY_LEN]), purpose::MAC).unwrap();
        let b = derive_key(&MasterKey::from_bytes([3u8; KEY_LEN]), purpose::MAC).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(MasterKey::from_slice(&[0u8; 16]).is_err());
        assert!(MasterKey::from_slice(&[0u8; KEY_LEN]).is_ok());
    }
}
