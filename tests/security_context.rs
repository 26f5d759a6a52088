//! End-to-end wiring of all components from one configuration.

use std::sync::Arc;
use std::time::Duration;

use scanshield::{
    CertificateDer, FileBackend, MemoryBackend, NoBiometrics, SecurityConfig, SecurityContext,
    SecurityError, UnixTime,
};
use tracing_subscriber::EnvFilter;

const HOST: &str = "api.scan.example";

fn server_chain() -> Vec<CertificateDer<'static>> {
    vec![CertificateDer::from(include_bytes!("fixtures/server.der").to_vec())]
}

/// 2030-01-01T00:00:00Z, inside the fixtures' validity window.
fn at() -> UnixTime {
    UnixTime::since_unix_epoch(Duration::from_secs(1_893_456_000))
}

/// Log output for `RUST_LOG=scanshield=debug cargo test`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_default_context_without_pinning() {
    init_tracing();
    let context = SecurityContext::initialize(
        SecurityConfig::default(),
        Arc::new(MemoryBackend::new()),
        Arc::new(NoBiometrics),
    )
    .await
    .unwrap();

    assert_eq!(context.store().namespace(), "com.morningstar.advancedportscanner");
    assert!(context.engine().is_ready());
    // No pin configured: the validator is present but unarmed, so even a
    // chain that a pinned deployment would accept is refused.
    let validator = context.validator();
    assert!(!validator.is_armed());
    assert!(!validator.validate_at(&server_chain(), HOST, at()));
    assert!(matches!(
        validator.require_valid(&server_chain(), HOST),
        Err(SecurityError::CertificatePinningFailure)
    ));

    context.signer().store_token("tok").unwrap();
    let envelope = context.signer().sign("GET", "https://api.scan.example/v1", None).unwrap();
    assert_eq!(envelope.bearer(), "tok");
}

#[tokio::test]
async fn test_context_survives_restart_with_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.json");

    let first = SecurityContext::initialize(
        SecurityConfig::default(),
        Arc::new(FileBackend::new(&path)),
        Arc::new(NoBiometrics),
    )
    .await
    .unwrap();
    first.state().put("scan_count", &3u32).unwrap();
    drop(first);

    let second = SecurityContext::initialize(
        SecurityConfig::default(),
        Arc::new(FileBackend::new(&path)),
        Arc::new(NoBiometrics),
    )
    .await
    .unwrap();
    assert_eq!(second.state().get::<u32>("scan_count").unwrap(), Some(3));
}

#[tokio::test]
async fn test_pinning_from_config_files() {
    init_tracing();
    let fixtures = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let config = SecurityConfig::from_json_str(&format!(
        r#"{{
            "pinned_certificate": "{}",
            "trust_anchors": ["{}"]
        }}"#,
        fixtures.join("server.der").display(),
        fixtures.join("ca.der").display(),
    ))
    .unwrap();

    let context = SecurityContext::initialize(
        config,
        Arc::new(MemoryBackend::new()),
        Arc::new(NoBiometrics),
    )
    .await
    .unwrap();
    let validator = context.validator();
    assert!(validator.is_armed());
    assert!(validator.validate_at(&server_chain(), HOST, at()));
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = SecurityConfig {
        namespace: String::new(),
        ..SecurityConfig::default()
    };
    let err = SecurityContext::initialize(config, Arc::new(MemoryBackend::new()), Arc::new(NoBiometrics))
        .await
        .unwrap_err();
    assert!(matches!(err, SecurityError::Config(_)));
}

#[tokio::test]
async fn test_missing_trust_anchor_is_a_config_error() {
    let config = SecurityConfig {
        pinned_certificate: Some("does-not-matter.der".into()),
        trust_anchors: vec!["/nonexistent/ca.der".into()],
        ..SecurityConfig::default()
    };
    let err = SecurityContext::initialize(config, Arc::new(MemoryBackend::new()), Arc::new(NoBiometrics))
        .await
        .unwrap_err();
    assert!(matches!(err, SecurityError::Config(_)));
}
