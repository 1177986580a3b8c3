//! Full roundtrip integration tests for chatwire-authstate.
//!
//! Exercises both backends through the public contract: credential bootstrap
//! and persistence, batched key-record reads and writes, at-rest encryption,
//! and the per-path exclusion guarantees of the file backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use chatwire_authstate::creds::init_auth_creds;
use chatwire_authstate::multi_file::MultiFileAuthState;
use chatwire_authstate::sqlite::SqliteAuthState;
use chatwire_authstate::types::{SignalDataType, SignalKeyStore, SignalKeyUpdates};

fn single_update(
    category: SignalDataType,
    id: &str,
    value: Option<serde_json::Value>,
) -> SignalKeyUpdates {
    let mut updates: SignalKeyUpdates = HashMap::new();
    updates.insert(category, HashMap::from([(id.to_string(), value)]));
    updates
}

#[tokio::test]
async fn plaintext_record_roundtrip_preserves_binary_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), None).await.unwrap();

    let value = json!({
        "registrationId": 123,
        "identityKey": {"type": "Buffer", "data": "AAECAwQFBgc="},
    });
    state
        .set(single_update(SignalDataType::Session, "peer@host:1", Some(value.clone())))
        .await
        .unwrap();

    let records = state
        .get(SignalDataType::Session, &["peer@host:1".to_string()])
        .await
        .unwrap();
    assert_eq!(
        records["peer@host:1"].as_ref().unwrap().as_raw(),
        Some(&value)
    );
}

#[tokio::test]
async fn encrypted_record_roundtrip_preserves_binary_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), Some("store secret"))
        .await
        .unwrap();

    let value = json!({"key": {"type": "Buffer", "data": "/u3erb7v"}});
    state
        .set(single_update(SignalDataType::PreKey, "1", Some(value.clone())))
        .await
        .unwrap();

    let records = state
        .get(SignalDataType::PreKey, &["1".to_string()])
        .await
        .unwrap();
    assert_eq!(records["1"].as_ref().unwrap().as_raw(), Some(&value));
}

#[tokio::test]
async fn reading_a_key_never_written_returns_absent() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), None).await.unwrap();

    let records = state
        .get(SignalDataType::SenderKey, &["ghost".to_string()])
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert!(records["ghost"].is_none());
}

#[tokio::test]
async fn removal_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), None).await.unwrap();

    state
        .set(single_update(SignalDataType::PreKey, "5", Some(json!({"n": 5}))))
        .await
        .unwrap();
    state
        .set(single_update(SignalDataType::PreKey, "5", None))
        .await
        .unwrap();
    state
        .set(single_update(SignalDataType::PreKey, "5", None))
        .await
        .unwrap();

    let records = state
        .get(SignalDataType::PreKey, &["5".to_string()])
        .await
        .unwrap();
    assert!(records["5"].is_none());
}

#[tokio::test]
async fn encrypted_files_do_not_contain_the_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), Some("store secret"))
        .await
        .unwrap();

    let marker = "very recognizable session marker";
    state
        .set(single_update(SignalDataType::Session, "c1", Some(json!({"marker": marker}))))
        .await
        .unwrap();
    state.save_creds().await.unwrap();

    let record_raw = std::fs::read_to_string(dir.path().join("session-c1.json")).unwrap();
    assert!(!record_raw.contains(marker));
    assert!(!record_raw.contains("marker"));

    let creds_raw = std::fs::read_to_string(dir.path().join("creds.json")).unwrap();
    assert!(!creds_raw.contains("noiseKey"));
}

#[tokio::test]
async fn unencrypted_files_use_the_documented_layout() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), None).await.unwrap();

    let mut updates: SignalKeyUpdates = HashMap::new();
    updates.insert(
        SignalDataType::Session,
        HashMap::from([("peer@host:1".to_string(), Some(json!(1)))]),
    );
    updates.insert(
        SignalDataType::SenderKey,
        HashMap::from([("group/member".to_string(), Some(json!(2)))]),
    );
    state.set(updates).await.unwrap();
    state.save_creds().await.unwrap();

    assert!(dir.path().join("creds.json").is_file());
    assert!(dir.path().join("session-peer@host-1.json").is_file());
    assert!(dir.path().join("sender-key-group__member.json").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_one_key_leave_exactly_one_value() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(MultiFileAuthState::open(dir.path(), None).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..16i64 {
        let state = Arc::clone(&state);
        tasks.push(tokio::spawn(async move {
            state
                .set(single_update(SignalDataType::PreKey, "7", Some(json!({"attempt": i}))))
                .await
                .unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let records = state
        .get(SignalDataType::PreKey, &["7".to_string()])
        .await
        .unwrap();
    let value = records["7"].as_ref().unwrap().as_raw().unwrap();
    let attempt = value["attempt"].as_i64().unwrap();
    assert!((0..16).contains(&attempt), "unexpected survivor: {attempt}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_operations_on_distinct_keys_both_complete() {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(MultiFileAuthState::open(dir.path(), None).await.unwrap());

    let mut tasks = Vec::new();
    for id in ["a", "b"] {
        let state = Arc::clone(&state);
        tasks.push(tokio::spawn(async move {
            for n in 0..8 {
                state
                    .set(single_update(SignalDataType::Session, id, Some(json!({"n": n}))))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let records = state
        .get(
            SignalDataType::Session,
            &["a".to_string(), "b".to_string()],
        )
        .await
        .unwrap();
    for id in ["a", "b"] {
        let value = records[id].as_ref().unwrap().as_raw().unwrap();
        assert_eq!(value["n"].as_i64(), Some(7));
    }
}

#[tokio::test]
async fn batch_set_writes_and_removes_in_one_call() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), None).await.unwrap();

    state
        .set(single_update(SignalDataType::PreKey, "2", Some(json!({"old": true}))))
        .await
        .unwrap();

    let mut updates: SignalKeyUpdates = HashMap::new();
    updates.insert(
        SignalDataType::PreKey,
        HashMap::from([
            ("1".to_string(), Some(json!({"fresh": true}))),
            ("2".to_string(), None),
        ]),
    );
    state.set(updates).await.unwrap();

    let records = state
        .get(
            SignalDataType::PreKey,
            &["1".to_string(), "2".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(
        records["1"].as_ref().unwrap().as_raw(),
        Some(&json!({"fresh": true}))
    );
    assert!(records["2"].is_none());
}

#[tokio::test]
async fn fresh_store_bootstraps_default_creds_and_persists_saves() {
    let dir = tempfile::tempdir().unwrap();

    let first = MultiFileAuthState::open(dir.path(), None).await.unwrap();
    let bootstrapped = first.creds.read().await.clone();
    let reference = init_auth_creds();
    assert_eq!(bootstrapped.next_pre_key_id, reference.next_pre_key_id);
    assert_eq!(bootstrapped.registered, reference.registered);
    assert_eq!(bootstrapped.account_settings, reference.account_settings);
    assert_ne!(bootstrapped.noise_key, reference.noise_key);

    first.creds.write().await.registered = true;
    first.save_creds().await.unwrap();
    let saved = first.creds.read().await.clone();
    drop(first);

    let second = MultiFileAuthState::open(dir.path(), None).await.unwrap();
    assert_eq!(*second.creds.read().await, saved);
}

#[tokio::test]
async fn encrypted_creds_survive_reopen_with_the_same_secret() {
    let dir = tempfile::tempdir().unwrap();

    let first = MultiFileAuthState::open(dir.path(), Some("pass"))
        .await
        .unwrap();
    first.save_creds().await.unwrap();
    let saved = first.creds.read().await.clone();
    drop(first);

    let second = MultiFileAuthState::open(dir.path(), Some("pass"))
        .await
        .unwrap();
    assert_eq!(*second.creds.read().await, saved);
}

#[tokio::test]
async fn wrong_secret_degrades_to_a_fresh_bundle() {
    let dir = tempfile::tempdir().unwrap();

    let first = MultiFileAuthState::open(dir.path(), Some("right"))
        .await
        .unwrap();
    first.save_creds().await.unwrap();
    let saved = first.creds.read().await.clone();
    drop(first);

    let second = MultiFileAuthState::open(dir.path(), Some("wrong"))
        .await
        .unwrap();
    assert_ne!(*second.creds.read().await, saved);
}

#[tokio::test]
async fn app_state_sync_keys_are_rehydrated_typed() {
    let dir = tempfile::tempdir().unwrap();
    let state = MultiFileAuthState::open(dir.path(), None).await.unwrap();

    let raw = json!({
        "keyData": {"type": "Buffer", "data": "AQIDBA=="},
        "fingerprint": {"rawId": 42, "currentIndex": 1, "deviceIndexes": [0]},
        "timestamp": 1700000000
    });
    state
        .set(single_update(SignalDataType::AppStateSyncKey, "k1", Some(raw)))
        .await
        .unwrap();

    let records = state
        .get(SignalDataType::AppStateSyncKey, &["k1".to_string()])
        .await
        .unwrap();
    let data = records["k1"]
        .as_ref()
        .unwrap()
        .as_app_state_sync_key()
        .unwrap();
    assert_eq!(data.key_data.as_ref().unwrap().as_bytes(), &[1, 2, 3, 4]);
    assert_eq!(data.fingerprint.as_ref().unwrap().raw_id, Some(42));

    // Every other category keeps its decoded form.
    let raw_session = json!({"keyData": "whatever"});
    state
        .set(single_update(SignalDataType::Session, "s", Some(raw_session.clone())))
        .await
        .unwrap();
    let records = state
        .get(SignalDataType::Session, &["s".to_string()])
        .await
        .unwrap();
    assert_eq!(records["s"].as_ref().unwrap().as_raw(), Some(&raw_session));
}

#[tokio::test]
async fn sqlite_backend_honors_the_same_contract() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("auth.db");

    let state = SqliteAuthState::open_path(&db_path).await.unwrap();

    // Absence is safe.
    let records = state
        .get(SignalDataType::PreKey, &["nope".to_string()])
        .await
        .unwrap();
    assert!(records["nope"].is_none());

    // Batch write + remove, then read back.
    state
        .set(single_update(SignalDataType::PreKey, "2", Some(json!({"old": true}))))
        .await
        .unwrap();
    let mut updates: SignalKeyUpdates = HashMap::new();
    updates.insert(
        SignalDataType::PreKey,
        HashMap::from([
            ("1".to_string(), Some(json!({"fresh": true}))),
            ("2".to_string(), None),
        ]),
    );
    state.set(updates).await.unwrap();

    let records = state
        .get(
            SignalDataType::PreKey,
            &["1".to_string(), "2".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(
        records["1"].as_ref().unwrap().as_raw(),
        Some(&json!({"fresh": true}))
    );
    assert!(records["2"].is_none());

    // Creds bootstrap, save, and reload across connections.
    state.creds.write().await.account_sync_counter = 9;
    state.save_creds().await.unwrap();
    let saved = state.creds.read().await.clone();
    state.close().unwrap();

    let reopened = SqliteAuthState::open_path(&db_path).await.unwrap();
    assert_eq!(*reopened.creds.read().await, saved);
    reopened.close().unwrap();
}
