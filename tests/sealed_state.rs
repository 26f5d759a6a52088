//! Typed application state sealed at rest.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use scanshield::{CryptoEngine, MemoryBackend, SealedState, SecureStore, SecurityError};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Achievements {
    unlocked: Vec<String>,
    streak_days: u32,
}

async fn state() -> (SealedState, SecureStore) {
    let store = SecureStore::new("com.example.scanner", Arc::new(MemoryBackend::new()));
    let engine = Arc::new(CryptoEngine::initialize(store.clone()).await.unwrap());
    (SealedState::new(engine, store.clone()), store)
}

#[tokio::test]
async fn test_typed_values_round_trip() {
    let (state, _) = state().await;
    let last_scan: DateTime<Utc> = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
    let achievements = Achievements {
        unlocked: vec!["first_scan".into(), "hundred_ports".into()],
        streak_days: 7,
    };

    state.put("scan_count", &42u64).unwrap();
    state.put("last_scan_date", &last_scan).unwrap();
    state.put("premium_status", &true).unwrap();
    state.put("achievements", &achievements).unwrap();

    assert_eq!(state.get::<u64>("scan_count").unwrap(), Some(42));
    assert_eq!(state.get::<DateTime<Utc>>("last_scan_date").unwrap(), Some(last_scan));
    assert_eq!(state.get::<bool>("premium_status").unwrap(), Some(true));
    assert_eq!(state.get::<Achievements>("achievements").unwrap(), Some(achievements));
}

#[tokio::test]
async fn test_absent_and_deleted_values_are_none() {
    let (state, _) = state().await;
    assert_eq!(state.get::<u64>("scan_count").unwrap(), None);

    state.put("scan_count", &1u64).unwrap();
    state.delete("scan_count").unwrap();
    assert_eq!(state.get::<u64>("scan_count").unwrap(), None);
}

#[tokio::test]
async fn test_values_are_not_stored_in_clear() {
    let (state, store) = state().await;
    state.put("premium_status", "lifetime-premium").unwrap();

    let raw = store.load("state.premium_status").unwrap();
    assert!(!raw.windows(8).any(|w| w == b"lifetime"));
}

#[tokio::test]
async fn test_record_moved_to_another_key_fails_authentication() {
    let (state, store) = state().await;
    state.put("premium_status", &false).unwrap();
    state.put("scan_count", &0u64).unwrap();

    // Copy the premium record over the scan count record.
    let premium = store.load("state.premium_status").unwrap();
    store.save("state.scan_count", &premium).unwrap();

    assert!(matches!(
        state.get::<bool>("scan_count"),
        Err(SecurityError::DecryptionError)
    ));
}

#[tokio::test]
async fn test_wrong_type_is_a_serialization_error() {
    let (state, _) = state().await;
    state.put("scan_count", &"many").unwrap();
    assert!(matches!(
        state.get::<u64>("scan_count"),
        Err(SecurityError::Serialization(_))
    ));
}
