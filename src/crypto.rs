//! Low-level cryptographic operations.
//!
//! Together with `keys`, this is the only module that touches `ring`'s AEAD
//! and HMAC primitives. Everything else encrypts, decrypts and signs
//! exclusively through the functions exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption)
//! - **MAC**: HMAC-SHA256
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **Key size**: 256 bits (32 bytes)

use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, SecurityError};

/// The AEAD algorithm used throughout scanshield.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the AEAD nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Size of a master or derived key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of an HMAC-SHA256 output in bytes.
pub const MAC_LEN: usize = 32;

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| SecurityError::RandomnessFailure)
}

/// Generate a cryptographically secure random key.
pub fn generate_random_key() -> Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    fill_random(&mut key)?;
    Ok(key)
}

/// Generate a fresh nonce. There is no caching or counter-based generation.
fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut buf = [0u8; NONCE_LEN];
    fill_random(&mut buf)?;
    Ok(buf)
}

fn aead_key(key_bytes: &[u8; KEY_LEN]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| SecurityError::InvalidKey)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt `plaintext` with AES-256-GCM, binding `aad` into the tag.
///
/// Returns `(nonce, ciphertext, tag)`; the ciphertext has the same length as
/// the plaintext.
pub fn seal(
    key_bytes: &[u8; KEY_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>, [u8; TAG_LEN])> {
    let key = aead_key(key_bytes).map_err(|_| SecurityError::EncryptionError)?;
    let nonce = generate_nonce()?;

    let mut in_out = plaintext.to_vec();
    let tag = key
        .seal_in_place_separate_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::from(aad),
            &mut in_out,
        )
        .map_err(|_| SecurityError::EncryptionError)?;

    let tag: [u8; TAG_LEN] = tag
        .as_ref()
        .try_into()
        .map_err(|_| SecurityError::EncryptionError)?;
    Ok((nonce, in_out, tag))
}

/// Decrypt and authenticate a payload produced by [`seal`].
///
/// If the key, nonce, AAD, ciphertext or tag do not match, the GCM check
/// fails and no partial plaintext is returned.
pub fn open(
    key_bytes: &[u8; KEY_LEN],
    aad: &[u8],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
) -> Result<Vec<u8>> {
    let key = aead_key(key_bytes).map_err(|_| SecurityError::DecryptionError)?;

    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext = key
        .open_in_place(Nonce::assume_unique_for_key(*nonce), Aad::from(aad), &mut in_out)
        .map_err(|_| SecurityError::DecryptionError)?;
    Ok(plaintext.to_vec())
}

/// Compute HMAC-SHA256 of `message`.
pub fn hmac_sha256(key_bytes: &[u8; KEY_LEN], message: &[u8]) -> [u8; MAC_LEN] {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key_bytes);
    let tag = hmac::sign(&key, message);
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(tag.as_ref());
    out
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn hmac_sha256_verify(key_bytes: &[u8; KEY_LEN], message: &[u8], tag: &[u8]) -> Result<()> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key_bytes);
    hmac::verify(&key, message, tag).map_err(|_| SecurityError::DecryptionError)
}
