//! The sealed payload produced by authenticated encryption.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::crypto::{NONCE_LEN, TAG_LEN};
use crate::error::{Result, SecurityError};

/// Nonce, ciphertext and GCM tag of one encryption.
///
/// Opaque to callers: only [`CryptoEngine`](crate::engine::CryptoEngine)
/// produces and opens these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    tag: [u8; TAG_LEN],
}

impl SealedPayload {
    pub(crate) fn new(nonce: [u8; NONCE_LEN], ciphertext: Vec<u8>, tag: [u8; TAG_LEN]) -> Self {
        Self {
            nonce,
            ciphertext,
            tag,
        }
    }

    /// The 12-byte nonce used for this payload.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// Combined wire layout.
    ///
    /// ```text
    /// [ nonce (12 bytes) ][ ciphertext ][ GCM tag (16 bytes) ]
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        out
    }

    /// Parse the combined layout produced by [`to_bytes`](Self::to_bytes).
    ///
    /// Input shorter than nonce + tag is a `DecryptionError`: a truncated
    /// record is indistinguishable from a tampered one.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(SecurityError::DecryptionError);
        }
        let (nonce, rest) = bytes.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        Ok(Self {
            nonce: nonce.try_into().map_err(|_| SecurityError::DecryptionError)?,
            ciphertext: ciphertext.to_vec(),
            tag: tag.try_into().map_err(|_| SecurityError::DecryptionError)?,
        })
    }

    /// Standard base64 of the combined layout, for text-only channels.
    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| SecurityError::DecryptionError)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_layout() {
        let payload = SealedPayload::new([1u8; NONCE_LEN], vec![2, 3, 4], [5u8; TAG_LEN]);
        let bytes = payload.to_bytes();
        assert_eq!(bytes.len(), NONCE_LEN + 3 + TAG_LEN);
        assert_eq!(&bytes[..NONCE_LEN], &[1u8; NONCE_LEN]);
        assert_eq!(SealedPayload::from_bytes(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_empty_plaintext_layout() {
        let payload = SealedPayload::new([0u8; NONCE_LEN], Vec::new(), [9u8; TAG_LEN]);
        let parsed = SealedPayload::from_bytes(&payload.to_bytes()).unwrap();
        assert!(parsed.ciphertext().is_empty());
    }

    #[test]
    fn test_truncated_input_is_rejected() {
        assert!(matches!(
            SealedPayload::from_bytes(&[0u8; NONCE_LEN + TAG_LEN - 1]),
            Err(SecurityError::DecryptionError)
        ));
        assert!(SealedPayload::from_base64("not base64!").is_err());
    }
}
