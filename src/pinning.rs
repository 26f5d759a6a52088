//! TLS certificate pinning.
//!
//! Runs once per handshake, on the connection path, before any request
//! bytes are sent:
//! 1. Standard chain and hostname validation ([`ChainVerifier`]).
//! 2. Only if that passes, the leaf's SubjectPublicKeyInfo is compared
//!    byte-for-byte with the SPKI of the bundled pinned certificate.
//!
//! Every failure, including a pinned asset that cannot be loaded, rejects
//! the connection. Pinning the key rather than the certificate lets the
//! server re-issue its certificate without an app update as long as the key
//! pair is kept.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use ring::digest;
use rustls_pki_types::{
    CertificateDer, ServerName, SignatureVerificationAlgorithm, TrustAnchor, UnixTime,
};
use tracing::{debug, warn};
use webpki::{EndEntityCert, KeyUsage};

use crate::error::{Result, SecurityError};

/// Signature algorithms accepted during chain validation.
static SUPPORTED_ALGS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
    webpki::ring::ED25519,
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
];

fn now() -> UnixTime {
    let secs = Utc::now().timestamp().max(0) as u64;
    UnixTime::since_unix_epoch(Duration::from_secs(secs))
}

// ---------------------------------------------------------------------------
// Standard validation
// ---------------------------------------------------------------------------

/// Standard X.509 path and hostname validation.
pub trait ChainVerifier: Send + Sync {
    /// Validate `end_entity` (with `intermediates`) for `host` at `now`.
    /// The error string is for logs only.
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        host: &str,
        now: UnixTime,
    ) -> std::result::Result<(), String>;
}

/// [`ChainVerifier`] backed by `rustls-webpki` and an explicit set of roots.
pub struct WebPkiVerifier {
    anchors: Vec<TrustAnchor<'static>>,
}

impl fmt::Debug for WebPkiVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPkiVerifier")
            .field("anchors", &self.anchors.len())
            .finish()
    }
}

impl WebPkiVerifier {
    /// Build from DER-encoded root certificates.
    pub fn from_der_roots<'a, I>(roots: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut anchors = Vec::new();
        for der in roots {
            let cert = CertificateDer::from(der);
            let anchor = webpki::anchor_from_trusted_cert(&cert)
                .map_err(|e| SecurityError::Config(format!("invalid trust anchor: {e:?}")))?;
            anchors.push(anchor.to_owned());
        }
        if anchors.is_empty() {
            return Err(SecurityError::Config("no trust anchors configured".into()));
        }
        Ok(Self { anchors })
    }
}

impl ChainVerifier for WebPkiVerifier {
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        host: &str,
        now: UnixTime,
    ) -> std::result::Result<(), String> {
        let cert = EndEntityCert::try_from(end_entity).map_err(|e| format!("leaf: {e:?}"))?;
        cert.verify_for_usage(
            SUPPORTED_ALGS,
            &self.anchors,
            intermediates,
            now,
            KeyUsage::server_auth(),
            None,
            None,
        )
        .map_err(|e| format!("chain: {e:?}"))?;

        let name = ServerName::try_from(host).map_err(|e| format!("host: {e}"))?;
        cert.verify_is_valid_for_subject_name(&name)
            .map_err(|e| format!("hostname: {e:?}"))
    }
}

/// Verifier with no trust anchors. Rejects every chain.
#[derive(Debug, Clone, Copy)]
struct NoAnchors;

impl ChainVerifier for NoAnchors {
    fn verify(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &str,
        _: UnixTime,
    ) -> std::result::Result<(), String> {
        Err("no trust anchors configured".into())
    }
}

// ---------------------------------------------------------------------------
// Pinned key
// ---------------------------------------------------------------------------

/// The SubjectPublicKeyInfo the server must present.
#[derive(Clone, PartialEq, Eq)]
pub struct PinnedKey {
    spki: Vec<u8>,
}

impl fmt::Debug for PinnedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PinnedKey").field(&self.fingerprint()).finish()
    }
}

fn leaf_spki(der: &CertificateDer<'_>) -> std::result::Result<Vec<u8>, String> {
    let cert = EndEntityCert::try_from(der).map_err(|e| format!("{e:?}"))?;
    Ok(cert.subject_public_key_info().as_ref().to_vec())
}

impl PinnedKey {
    /// Extract the pinned key from a DER certificate (the bundled asset).
    pub fn from_certificate_der(der: &[u8]) -> Result<Self> {
        let cert = CertificateDer::from(der);
        let spki = leaf_spki(&cert)
            .map_err(|e| SecurityError::Config(format!("pinned certificate unreadable: {e}")))?;
        Ok(Self { spki })
    }

    /// Base64 SHA-256 of the SPKI, the usual `pin-sha256` form.
    pub fn fingerprint(&self) -> String {
        general_purpose::STANDARD.encode(digest::digest(&digest::SHA256, &self.spki))
    }

    fn matches(&self, presented: &[u8]) -> bool {
        self.spki.as_slice() == presented
    }
}

/// Where the bundled pinned certificate comes from.
pub trait PinSource: Send + Sync {
    /// Read the DER bytes of the pinned certificate.
    fn load(&self) -> Result<Vec<u8>>;
}

/// Pinned certificate read from an application resource on disk.
#[derive(Debug, Clone)]
pub struct FilePinSource {
    path: PathBuf,
}

impl FilePinSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PinSource for FilePinSource {
    fn load(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|e| {
            SecurityError::Config(format!(
                "pinned certificate {} unreadable: {e}",
                self.path.display()
            ))
        })
    }
}

/// Pinned certificate compiled into the binary (`include_bytes!`).
#[derive(Debug, Clone)]
pub struct StaticPinSource(pub &'static [u8]);

impl PinSource for StaticPinSource {
    fn load(&self) -> Result<Vec<u8>> {
        Ok(self.0.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Approves or rejects the server identity during the TLS handshake.
pub struct CertificateValidator {
    verifier: Arc<dyn ChainVerifier>,
    // `None` when no pin is configured or the asset could not be loaded:
    // every validation fails.
    pin: Option<PinnedKey>,
}

impl fmt::Debug for CertificateValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateValidator")
            .field("pin", &self.pin)
            .finish_non_exhaustive()
    }
}

impl CertificateValidator {
    /// Create a validator. The pinned asset is loaded once here; if it
    /// cannot be loaded the validator is still constructed but rejects
    /// every connection.
    pub fn new(verifier: Arc<dyn ChainVerifier>, source: &dyn PinSource) -> Self {
        let pin = match source.load().and_then(|der| PinnedKey::from_certificate_der(&der)) {
            Ok(pin) => {
                debug!(fingerprint = %pin.fingerprint(), "pinned key loaded");
                Some(pin)
            }
            Err(e) => {
                warn!(error = %e, "pinned certificate unavailable; all connections will be rejected");
                None
            }
        };
        Self { verifier, pin }
    }

    /// A validator with no pinned key and no trust anchors, for deployments
    /// that have not configured pinning. It rejects every connection.
    pub fn unconfigured() -> Self {
        warn!("certificate pinning not configured; all connections will be rejected");
        Self {
            verifier: Arc::new(NoAnchors),
            pin: None,
        }
    }

    pub fn with_pin(verifier: Arc<dyn ChainVerifier>, pin: PinnedKey) -> Self {
        Self {
            verifier,
            pin: Some(pin),
        }
    }

    /// Whether a pinned key is loaded.
    pub fn is_armed(&self) -> bool {
        self.pin.is_some()
    }

    /// Validate the presented chain (leaf first) for `host` at the current
    /// time.
    pub fn validate(&self, chain: &[CertificateDer<'_>], host: &str) -> bool {
        self.validate_at(chain, host, now())
    }

    /// [`validate`](Self::validate) at an explicit time.
    pub fn validate_at(&self, chain: &[CertificateDer<'_>], host: &str, now: UnixTime) -> bool {
        let Some(pin) = &self.pin else {
            warn!(host, "rejecting connection: no pinned key");
            return false;
        };
        let Some((leaf, intermediates)) = chain.split_first() else {
            warn!(host, "rejecting connection: empty certificate chain");
            return false;
        };

        if let Err(reason) = self.verifier.verify(leaf, intermediates, host, now) {
            warn!(host, %reason, "rejecting connection: standard validation failed");
            return false;
        }

        match leaf_spki(leaf) {
            Ok(spki) if pin.matches(&spki) => {
                debug!(host, "server key matches pin");
                true
            }
            Ok(_) => {
                warn!(host, "rejecting connection: server key does not match pin");
                false
            }
            Err(reason) => {
                warn!(host, %reason, "rejecting connection: leaf unreadable");
                false
            }
        }
    }

    /// Like [`validate`](Self::validate) but as an error, for call sites
    /// that propagate with `?`.
    pub fn require_valid(&self, chain: &[CertificateDer<'_>], host: &str) -> Result<()> {
        if self.validate(chain, host) {
            Ok(())
        } else {
            Err(SecurityError::CertificatePinningFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AcceptAll;

    impl ChainVerifier for AcceptAll {
        fn verify(
            &self,
            _: &CertificateDer<'_>,
            _: &[CertificateDer<'_>],
            _: &str,
            _: UnixTime,
        ) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct MissingAsset;

    impl PinSource for MissingAsset {
        fn load(&self) -> Result<Vec<u8>> {
            Err(SecurityError::Config("missing".into()))
        }
    }

    #[test]
    fn test_garbage_pinned_certificate_rejected() {
        assert!(PinnedKey::from_certificate_der(b"not a certificate").is_err());
    }

    #[test]
    fn test_missing_asset_fails_closed() {
        let validator = CertificateValidator::new(Arc::new(AcceptAll), &MissingAsset);
        assert!(!validator.is_armed());
        assert!(!validator.validate(&[CertificateDer::from(vec![0u8; 4])], "api.scan.example"));
    }

    #[test]
    fn test_unconfigured_validator_rejects_everything() {
        let validator = CertificateValidator::unconfigured();
        assert!(!validator.is_armed());
        assert!(!validator.validate(&[CertificateDer::from(vec![0u8; 4])], "api.scan.example"));
        assert!(NoAnchors
            .verify(&CertificateDer::from(vec![0u8; 4]), &[], "api.scan.example", now())
            .is_err());
    }

    #[test]
    fn test_empty_chain_rejected() {
        let validator = CertificateValidator::with_pin(
            Arc::new(AcceptAll),
            PinnedKey { spki: vec![1, 2, 3] },
        );
        assert!(!validator.validate(&[], "api.scan.example"));
        assert!(matches!(
            validator.require_valid(&[], "api.scan.example"),
            Err(SecurityError::CertificatePinningFailure)
        ));
    }
}
