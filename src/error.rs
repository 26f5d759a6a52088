//! Error types for scanshield.
//!
//! Every variant is a distinct failure mode of the security module. Messages
//! are intentionally minimal: they say *what* failed without revealing
//! cryptographic state (no key bytes, MACs, or certificate details).

/// The single error type for all scanshield operations.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// The platform secure store is unavailable or its contents are corrupted.
    #[error("secure storage fault: {0}")]
    StorageFault(String),

    /// An expected secret record is absent.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// Encryption could not be performed (no active key, or the AEAD
    /// operation itself failed).
    #[error("encryption failed")]
    EncryptionError,

    /// Decryption failed. This covers tampered ciphertext, a wrong key, a
    /// truncated payload, and corrupted storage alike.
    #[error("decryption failed")]
    DecryptionError,

    /// The device cannot run an authentication challenge (no biometric
    /// hardware or enrollment, no fallback secret enrolled).
    #[error("device authentication unavailable")]
    AuthenticationUnavailable,

    /// The user declined or failed the authentication challenge.
    #[error("device authentication denied")]
    AuthenticationDenied,

    /// The server certificate did not pass chain validation or did not
    /// match the pinned public key.
    #[error("server identity could not be verified")]
    CertificatePinningFailure,

    /// A cryptographic key was malformed (wrong length, unusable bytes).
    #[error("invalid key")]
    InvalidKey,

    /// Key derivation (HKDF / PBKDF2) failed.
    #[error("key derivation failed")]
    KeyDerivationFailure,

    /// The system random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// A header value could not be encoded for the outbound request.
    #[error("invalid header value for {0}")]
    InvalidHeader(&'static str),

    /// The configuration is malformed or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A stored record could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl SecurityError {
    /// True for failures the user can resolve by authenticating again.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationUnavailable | Self::AuthenticationDenied
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SecurityError>;
