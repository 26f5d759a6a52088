//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::auth::MIN_FALLBACK_ITERATIONS;
use crate::error::{Result, SecurityError};

pub const DEFAULT_NAMESPACE: &str = "com.morningstar.advancedportscanner";
pub const DEFAULT_AUTH_REASON: &str = "Authenticate to start a scan";
pub const DEFAULT_FALLBACK_ITERATIONS: u32 = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Service identifier every secret record is scoped to.
    pub namespace: String,
    /// Shown by the platform authentication prompt.
    pub auth_reason: String,
    /// DER certificate whose public key the server must present.
    pub pinned_certificate: Option<PathBuf>,
    /// DER root certificates for standard chain validation.
    pub trust_anchors: Vec<PathBuf>,
    /// PBKDF2 rounds for the fallback secret verifier.
    pub fallback_iterations: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            auth_reason: DEFAULT_AUTH_REASON.to_string(),
            pinned_certificate: None,
            trust_anchors: Vec::new(),
            fallback_iterations: DEFAULT_FALLBACK_ITERATIONS,
        }
    }
}

impl SecurityConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SecurityError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| SecurityError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(SecurityError::Config("namespace must not be empty".into()));
        }
        if self.auth_reason.trim().is_empty() {
            return Err(SecurityError::Config("auth_reason must not be empty".into()));
        }
        if self.fallback_iterations < MIN_FALLBACK_ITERATIONS {
            return Err(SecurityError::Config(format!(
                "fallback_iterations must be at least {MIN_FALLBACK_ITERATIONS}"
            )));
        }
        if self.pinned_certificate.is_some() && self.trust_anchors.is_empty() {
            return Err(SecurityError::Config(
                "pinned_certificate requires at least one trust anchor".into(),
            ));
        }
        Ok(())
    }
}
