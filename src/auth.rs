//! Device-level authentication gate.
//!
//! `AuthGate` runs one challenge per call and keeps no session: every
//! privileged workflow asks again. Callers that want a grace period must
//! keep their own short-lived "recently authenticated" marker.
//!
//! ```text
//! Idle -> Challenging -> { Authenticated, Denied }
//! ```
//!
//! A challenge that cannot be presented at all (no biometry, no enrolled
//! fallback) leaves the gate `Idle`.
//!
//! Biometry is tried first. When it is unavailable the gate reports
//! `AuthenticationUnavailable` and the caller may offer the fallback secret
//! challenge instead; the gate never approves on its own.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use ring::pbkdf2;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::{Result, SecurityError};
use crate::store::{record, SecureStore};

/// Lowest accepted PBKDF2 iteration count for the fallback verifier.
pub const MIN_FALLBACK_ITERATIONS: u32 = 10_000;

const SALT_LEN: usize = 16;
const VERIFIER_LEN: usize = 32;
const RECORD_LEN: usize = SALT_LEN + 4 + VERIFIER_LEN;

/// State of the most recent challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    Challenging,
    Authenticated,
    Denied,
}

/// What the platform reports about biometric capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiometryStatus {
    Available,
    /// Hardware present, no biometrics enrolled.
    NotEnrolled,
    NoHardware,
}

/// Result of one platform challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Approved,
    /// The user dismissed the prompt.
    Cancelled,
    /// Wrong biometric, lockout, or a policy failure.
    Failed,
}

/// Platform device-authentication capability.
#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    /// Whether a biometric challenge can run right now.
    fn biometry(&self) -> BiometryStatus;

    /// Show the platform prompt with a human-readable `reason` and wait for
    /// the user.
    async fn evaluate(&self, reason: &str) -> ChallengeOutcome;
}

/// Authenticator for hosts without biometric hardware. Only the fallback
/// secret challenge is usable with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBiometrics;

#[async_trait]
impl DeviceAuthenticator for NoBiometrics {
    fn biometry(&self) -> BiometryStatus {
        BiometryStatus::NoHardware
    }

    async fn evaluate(&self, _reason: &str) -> ChallengeOutcome {
        ChallengeOutcome::Failed
    }
}

/// Marks the gate `Challenging` and resolves to `Denied` if dropped before
/// `finish`, so an abandoned challenge never stays open.
struct Challenge<'a> {
    state: &'a Mutex<AuthState>,
    resolved: bool,
}

impl<'a> Challenge<'a> {
    fn begin(state: &'a Mutex<AuthState>) -> Self {
        *state.lock() = AuthState::Challenging;
        Self {
            state,
            resolved: false,
        }
    }

    fn finish(mut self, approved: bool) -> bool {
        *self.state.lock() = if approved {
            AuthState::Authenticated
        } else {
            AuthState::Denied
        };
        self.resolved = true;
        approved
    }

    /// No challenge could be presented; go back to `Idle`.
    fn withdraw(mut self) {
        *self.state.lock() = AuthState::Idle;
        self.resolved = true;
    }
}

impl Drop for Challenge<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            *self.state.lock() = AuthState::Denied;
        }
    }
}

/// Gates sensitive operations behind a fresh device challenge.
pub struct AuthGate {
    authenticator: Arc<dyn DeviceAuthenticator>,
    store: SecureStore,
    reason: String,
    fallback_iterations: NonZeroU32,
    state: Mutex<AuthState>,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("reason", &self.reason)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Create a gate. `reason` is shown by the platform prompt.
    pub fn new(
        authenticator: Arc<dyn DeviceAuthenticator>,
        store: SecureStore,
        reason: impl Into<String>,
        fallback_iterations: u32,
    ) -> Result<Self> {
        let fallback_iterations = NonZeroU32::new(fallback_iterations)
            .filter(|n| n.get() >= MIN_FALLBACK_ITERATIONS)
            .ok_or_else(|| {
                SecurityError::Config(format!(
                    "fallback iterations must be at least {MIN_FALLBACK_ITERATIONS}"
                ))
            })?;
        Ok(Self {
            authenticator,
            store,
            reason: reason.into(),
            fallback_iterations,
            state: Mutex::new(AuthState::Idle),
        })
    }

    pub fn state(&self) -> AuthState {
        *self.state.lock()
    }

    /// Run a biometric challenge.
    ///
    /// Returns `Ok(true)` when approved and `Ok(false)` when the user
    /// cancels, fails, or `cancel` fires first. Returns
    /// `Err(AuthenticationUnavailable)` when biometry cannot run; the caller
    /// should then offer [`authenticate_with_fallback`](Self::authenticate_with_fallback).
    /// Never retries.
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<bool> {
        let status = self.authenticator.biometry();
        if status != BiometryStatus::Available {
            // Nothing was shown to the user, so nothing was denied.
            *self.state.lock() = AuthState::Idle;
            debug!(?status, "biometric challenge unavailable");
            return Err(SecurityError::AuthenticationUnavailable);
        }

        let challenge = Challenge::begin(&self.state);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => ChallengeOutcome::Cancelled,
            outcome = self.authenticator.evaluate(&self.reason) => outcome,
        };

        let approved = challenge.finish(outcome == ChallengeOutcome::Approved);
        info!(?outcome, "biometric challenge resolved");
        Ok(approved)
    }

    /// Like [`authenticate`](Self::authenticate) but a denial is an error,
    /// for call sites that must not proceed without approval.
    pub async fn authorize(&self, cancel: &CancellationToken) -> Result<()> {
        if self.authenticate(cancel).await? {
            Ok(())
        } else {
            Err(SecurityError::AuthenticationDenied)
        }
    }

    /// Whether a fallback secret has been enrolled.
    pub fn has_fallback(&self) -> Result<bool> {
        self.store.contains(record::AUTH_FALLBACK)
    }

    /// Enroll (or replace) the fallback secret. Only a salted PBKDF2
    /// verifier is stored.
    pub fn enroll_fallback(&self, secret: &str) -> Result<()> {
        if secret.is_empty() {
            return Err(SecurityError::Config("fallback secret must not be empty".into()));
        }
        let mut salt = [0u8; SALT_LEN];
        crypto::fill_random(&mut salt)?;

        let mut verifier = Zeroizing::new([0u8; VERIFIER_LEN]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.fallback_iterations,
            &salt,
            secret.as_bytes(),
            &mut verifier[..],
        );

        let mut entry = Vec::with_capacity(RECORD_LEN);
        entry.extend_from_slice(&salt);
        entry.extend_from_slice(&self.fallback_iterations.get().to_be_bytes());
        entry.extend_from_slice(&verifier[..]);
        self.store.save(record::AUTH_FALLBACK, &entry)?;
        info!("fallback secret enrolled");
        Ok(())
    }

    pub fn remove_fallback(&self) -> Result<()> {
        self.store.remove(record::AUTH_FALLBACK)
    }

    /// Run the fallback secret challenge.
    ///
    /// `Ok(true)` on a match, `Ok(false)` on a mismatch,
    /// `Err(AuthenticationUnavailable)` if no secret is enrolled.
    pub async fn authenticate_with_fallback(&self, secret: &str) -> Result<bool> {
        let challenge = Challenge::begin(&self.state);

        let store = self.store.clone();
        let secret = Zeroizing::new(secret.to_owned());
        let verified = tokio::task::spawn_blocking(move || verify_fallback(&store, &secret))
            .await
            .map_err(|e| SecurityError::StorageFault(format!("fallback task failed: {e}")))?;

        let approved = match verified {
            Ok(approved) => challenge.finish(approved),
            Err(SecurityError::AuthenticationUnavailable) => {
                challenge.withdraw();
                debug!("fallback challenge unavailable: no secret enrolled");
                return Err(SecurityError::AuthenticationUnavailable);
            }
            // Dropping the challenge resolves it to Denied.
            Err(e) => return Err(e),
        };
        if approved {
            info!("fallback challenge approved");
        } else {
            warn!("fallback challenge rejected");
        }
        Ok(approved)
    }
}

fn verify_fallback(store: &SecureStore, secret: &str) -> Result<bool> {
    let entry = store
        .load_optional(record::AUTH_FALLBACK)?
        .ok_or(SecurityError::AuthenticationUnavailable)?;
    if entry.len() != RECORD_LEN {
        return Err(SecurityError::StorageFault("malformed fallback verifier".into()));
    }

    let (salt, rest) = entry.split_at(SALT_LEN);
    let (iterations, verifier) = rest.split_at(4);
    let iterations = iterations
        .try_into()
        .map(u32::from_be_bytes)
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| SecurityError::StorageFault("malformed fallback verifier".into()))?;

    Ok(pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        secret.as_bytes(),
        verifier,
    )
    .is_ok())
}
