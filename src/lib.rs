//! # scanshield
//!
//! Client-side security module for the port scanner app.
//!
//! Five components, each usable on its own and wired together by
//! [`SecurityContext`]:
//!
//! - [`SecureStore`]: namespaced upsert storage for small secrets over a
//!   platform [`SecretBackend`].
//! - [`CryptoEngine`]: one persisted installation key, AES-256-GCM sealing,
//!   and HMAC-SHA256 under HKDF-derived sub-keys.
//! - [`AuthGate`]: a fresh device challenge per privileged action, with no
//!   cached session.
//! - [`RequestSigner`]: bearer token, nonce, timestamp and signature headers
//!   for every outbound request.
//! - [`CertificateValidator`]: standard chain validation followed by a
//!   public-key pin, failing closed.
//!
//! ## Public API
//!
//! Low-level primitives (`crypto`, `keys`) are `pub(crate)`. Callers only
//! ever touch keys through the engine.

pub(crate) mod crypto;
pub(crate) mod keys;

pub mod auth;
pub mod backend;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod payload;
pub mod pinning;
pub mod signer;
pub mod state;
pub mod store;

pub use auth::{AuthGate, AuthState, BiometryStatus, ChallengeOutcome, DeviceAuthenticator, NoBiometrics};
#[cfg(feature = "keyring")]
pub use backend::KeyringBackend;
pub use backend::{BackendError, FileBackend, MemoryBackend, SecretBackend};
pub use config::SecurityConfig;
pub use context::SecurityContext;
pub use engine::{CryptoEngine, KeyOrigin};
pub use error::{Result, SecurityError};
pub use payload::SealedPayload;
pub use pinning::{
    CertificateValidator, ChainVerifier, FilePinSource, PinSource, PinnedKey, StaticPinSource,
    WebPkiVerifier,
};
pub use signer::{Clock, RequestSigner, SignedEnvelope, SystemClock};
pub use state::SealedState;
pub use store::SecureStore;

/// Certificate and time types used by [`CertificateValidator`].
pub use rustls_pki_types::{CertificateDer, UnixTime};
