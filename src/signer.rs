//! Outbound request signing.
//!
//! Every request gets a fresh envelope:
//!
//! ```text
//! Authorization: Bearer <token-or-empty>
//! X-Nonce:       <base64url, 128 random bits>
//! X-Timestamp:   <unix seconds>
//! X-Signature:   base64(HMAC-SHA256(METHOD:URL:TIMESTAMP:NONCE[:BODY_HASH_HEX]))
//! ```
//!
//! The signer holds no per-request state. Envelopes are built right before
//! dispatch and consumed when applied; a retry must call [`RequestSigner::sign`]
//! again.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tracing::debug;

use crate::crypto;
use crate::engine::CryptoEngine;
use crate::error::{Result, SecurityError};
use crate::store::{record, SecureStore};

pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_SIGNATURE: &str = "x-signature";

/// Random bytes per nonce.
pub const NONCE_BYTES: usize = 16;

/// Source of request timestamps.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_unix(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// The exact byte string covered by `X-Signature`.
///
/// Public so a verifying peer (or a test) can rebuild it.
pub fn signing_input(
    method: &str,
    url: &str,
    timestamp: i64,
    nonce: &str,
    body_hash: Option<&[u8]>,
) -> Vec<u8> {
    let mut input = format!("{}:{}:{}:{}", method.to_ascii_uppercase(), url, timestamp, nonce);
    if let Some(hash) = body_hash {
        input.push(':');
        input.push_str(&hex::encode(hash));
    }
    input.into_bytes()
}

/// Auth headers for a single request. Not `Clone`: one envelope, one send.
#[derive(Debug)]
pub struct SignedEnvelope {
    bearer: String,
    nonce: String,
    timestamp: i64,
    signature: String,
}

impl SignedEnvelope {
    /// The bearer token (possibly empty).
    pub fn bearer(&self) -> &str {
        &self.bearer
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Base64 HMAC.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Header name/value pairs in canonical order.
    pub fn headers(&self) -> [(&'static str, String); 4] {
        [
            ("Authorization", format!("Bearer {}", self.bearer)),
            ("X-Nonce", self.nonce.clone()),
            ("X-Timestamp", self.timestamp.to_string()),
            ("X-Signature", self.signature.clone()),
        ]
    }

    /// Write the envelope into `headers`, replacing any previous values,
    /// and consume it.
    pub fn apply(self, headers: &mut HeaderMap) -> Result<()> {
        let mut authorization = HeaderValue::try_from(format!("Bearer {}", self.bearer))
            .map_err(|_| SecurityError::InvalidHeader("Authorization"))?;
        authorization.set_sensitive(true);

        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            HeaderName::from_static(HEADER_NONCE),
            HeaderValue::try_from(self.nonce).map_err(|_| SecurityError::InvalidHeader("X-Nonce"))?,
        );
        headers.insert(
            HeaderName::from_static(HEADER_TIMESTAMP),
            HeaderValue::from(self.timestamp),
        );
        headers.insert(
            HeaderName::from_static(HEADER_SIGNATURE),
            HeaderValue::try_from(self.signature)
                .map_err(|_| SecurityError::InvalidHeader("X-Signature"))?,
        );
        Ok(())
    }
}

/// Builds signed envelopes using the engine's MAC key and the stored bearer
/// token.
pub struct RequestSigner {
    engine: Arc<CryptoEngine>,
    store: SecureStore,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner").finish_non_exhaustive()
    }
}

impl RequestSigner {
    pub fn new(engine: Arc<CryptoEngine>, store: SecureStore) -> Self {
        Self::with_clock(engine, store, Arc::new(SystemClock))
    }

    pub fn with_clock(engine: Arc<CryptoEngine>, store: SecureStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            store,
            clock,
        }
    }

    /// Persist the bearer token for later requests.
    pub fn store_token(&self, token: &str) -> Result<()> {
        self.store.save(record::AUTH_TOKEN, token.as_bytes())
    }

    /// Drop the bearer token (logout). Later envelopes carry an empty bearer.
    pub fn clear_token(&self) -> Result<()> {
        self.store.remove(record::AUTH_TOKEN)
    }

    fn bearer(&self) -> Result<String> {
        match self.store.load_optional(record::AUTH_TOKEN)? {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| SecurityError::StorageFault("auth token is not valid UTF-8".into())),
            None => Ok(String::new()),
        }
    }

    /// Build a fresh envelope for `method` + `url`.
    ///
    /// `body_hash`, when given, is bound into the signature as lowercase hex.
    /// A missing token yields an empty bearer; any other storage failure is
    /// returned.
    pub fn sign(&self, method: &str, url: &str, body_hash: Option<&[u8]>) -> Result<SignedEnvelope> {
        let bearer = self.bearer()?;

        let mut raw = [0u8; NONCE_BYTES];
        crypto::fill_random(&mut raw)?;
        let nonce = general_purpose::URL_SAFE_NO_PAD.encode(raw);
        let timestamp = self.clock.now_unix();

        let input = signing_input(method, url, timestamp, &nonce, body_hash);
        let tag = self.engine.mac(&input)?;
        let signature = general_purpose::STANDARD.encode(tag);

        debug!(method, url, timestamp, "request signed");
        Ok(SignedEnvelope {
            bearer,
            nonce,
            timestamp,
            signature,
        })
    }

    /// Sign and apply to `headers` in one step.
    pub fn sign_into(
        &self,
        method: &str,
        url: &str,
        body_hash: Option<&[u8]>,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        self.sign(method, url, body_hash)?.apply(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_input_layout() {
        assert_eq!(
            signing_input("get", "https://api.scan.example/v1/ports", 1_700_000_000, "abc", None),
            b"GET:https://api.scan.example/v1/ports:1700000000:abc".to_vec()
        );
        assert_eq!(
            signing_input("POST", "/v1/scan", 1, "n", Some(&[0xde, 0xad][..])),
            b"POST:/v1/scan:1:n:dead".to_vec()
        );
    }

    #[test]
    fn test_headers_contract() {
        let envelope = SignedEnvelope {
            bearer: String::new(),
            nonce: "n".into(),
            timestamp: 42,
            signature: "sig".into(),
        };
        let headers = envelope.headers();
        assert_eq!(headers[0], ("Authorization", "Bearer ".to_string()));
        assert_eq!(headers[2], ("X-Timestamp", "42".to_string()));
    }
}
