//! One explicitly constructed security module per application.
//!
//! Built once at startup and passed to whoever needs it; components are
//! shared through `Arc` and there is no process-global instance.

use std::sync::Arc;

use tracing::info;

use crate::auth::{AuthGate, DeviceAuthenticator};
use crate::backend::SecretBackend;
use crate::config::SecurityConfig;
use crate::engine::CryptoEngine;
use crate::error::{Result, SecurityError};
use crate::pinning::{CertificateValidator, FilePinSource, WebPkiVerifier};
use crate::signer::RequestSigner;
use crate::state::SealedState;
use crate::store::SecureStore;

#[derive(Debug, Clone)]
pub struct SecurityContext {
    store: SecureStore,
    engine: Arc<CryptoEngine>,
    auth: Arc<AuthGate>,
    signer: Arc<RequestSigner>,
    state: SealedState,
    validator: Arc<CertificateValidator>,
}

fn load_validator(config: &SecurityConfig) -> Result<CertificateValidator> {
    let Some(pinned) = &config.pinned_certificate else {
        return Ok(CertificateValidator::unconfigured());
    };

    let roots = config
        .trust_anchors
        .iter()
        .map(|path| {
            std::fs::read(path)
                .map_err(|e| SecurityError::Config(format!("{}: {e}", path.display())))
        })
        .collect::<Result<Vec<_>>>()?;
    let verifier = WebPkiVerifier::from_der_roots(roots.iter().map(Vec::as_slice))?;

    Ok(CertificateValidator::new(
        Arc::new(verifier),
        &FilePinSource::new(pinned),
    ))
}

impl SecurityContext {
    /// Validate `config` and bring every component up.
    ///
    /// Fails if the store cannot be read or the configuration is invalid. A
    /// missing or unloadable pinned certificate does not fail startup; the
    /// validator then rejects every connection.
    pub async fn initialize(
        config: SecurityConfig,
        backend: Arc<dyn SecretBackend>,
        authenticator: Arc<dyn DeviceAuthenticator>,
    ) -> Result<Self> {
        config.validate()?;

        let store = SecureStore::new(config.namespace.clone(), backend);
        let engine = Arc::new(CryptoEngine::initialize(store.clone()).await?);
        let auth = Arc::new(AuthGate::new(
            authenticator,
            store.clone(),
            config.auth_reason.clone(),
            config.fallback_iterations,
        )?);
        let signer = Arc::new(RequestSigner::new(engine.clone(), store.clone()));
        let state = SealedState::new(engine.clone(), store.clone());
        let validator = Arc::new(load_validator(&config)?);

        info!(
            namespace = %config.namespace,
            degraded = engine.is_degraded(),
            pinning = validator.is_armed(),
            "security context ready"
        );
        Ok(Self {
            store,
            engine,
            auth,
            signer,
            state,
            validator,
        })
    }

    pub fn store(&self) -> &SecureStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<CryptoEngine> {
        &self.engine
    }

    pub fn auth(&self) -> &Arc<AuthGate> {
        &self.auth
    }

    pub fn signer(&self) -> &Arc<RequestSigner> {
        &self.signer
    }

    pub fn state(&self) -> &SealedState {
        &self.state
    }

    /// The handshake validator. Without a configured pinned certificate it
    /// is unarmed and rejects every connection.
    pub fn validator(&self) -> &Arc<CertificateValidator> {
        &self.validator
    }
}
