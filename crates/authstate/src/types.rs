//! The shared key-store contract and the record categories it partitions.
//!
//! Key records are opaque JSON values to this layer, with one exception:
//! `app-state-sync-key` records are re-hydrated into their protocol
//! representation ([`AppStateSyncKeyData`]) when read back, because consumers
//! operate on the typed form.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::buffer_json::Buffer;
use crate::error::AuthStateError;

/// Fixed set of key-record categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalDataType {
    PreKey,
    Session,
    SenderKey,
    AppStateSyncKey,
    AppStateSyncVersion,
    SenderKeyMemory,
}

impl SignalDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDataType::PreKey => "pre-key",
            SignalDataType::Session => "session",
            SignalDataType::SenderKey => "sender-key",
            SignalDataType::AppStateSyncKey => "app-state-sync-key",
            SignalDataType::AppStateSyncVersion => "app-state-sync-version",
            SignalDataType::SenderKeyMemory => "sender-key-memory",
        }
    }

    /// The logical record key for one identifier in this category.
    pub fn record_key(&self, id: &str) -> String {
        format!("{}-{}", self.as_str(), id)
    }
}

impl fmt::Display for SignalDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// App-state sync key material in its protocol representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<Buffer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyFingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<u32>,
    #[serde(default)]
    pub device_indexes: Vec<u32>,
}

/// A stored key record as handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalRecord {
    /// An `app-state-sync-key` record, re-hydrated into its typed form.
    AppStateSyncKey(AppStateSyncKeyData),
    /// Any other category, returned as its decoded JSON value unchanged.
    Raw(serde_json::Value),
}

impl SignalRecord {
    pub fn as_raw(&self) -> Option<&serde_json::Value> {
        match self {
            SignalRecord::Raw(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_app_state_sync_key(&self) -> Option<&AppStateSyncKeyData> {
        match self {
            SignalRecord::AppStateSyncKey(data) => Some(data),
            _ => None,
        }
    }
}

/// Batch read result: every requested id is present, absent records as `None`.
pub type SignalKeyMap = HashMap<String, Option<SignalRecord>>;

/// Batch mutation: `Some` writes the record, `None` removes it.
pub type SignalKeyUpdates = HashMap<SignalDataType, HashMap<String, Option<serde_json::Value>>>;

/// The key-record contract every backend exposes.
#[async_trait]
pub trait SignalKeyStore: Send + Sync {
    /// Fetch a batch of identifiers in one category. The returned map carries
    /// an entry for every requested id; ids with no stored record map to
    /// `None`.
    async fn get(
        &self,
        category: SignalDataType,
        ids: &[String],
    ) -> Result<SignalKeyMap, AuthStateError>;

    /// Apply a batch of writes and removals. The whole batch settles before
    /// the call returns; the first failure, if any, is then surfaced.
    async fn set(&self, updates: SignalKeyUpdates) -> Result<(), AuthStateError>;
}

/// Decode a stored value into the form handed back for `category`.
///
/// Returns `None` when an `app-state-sync-key` value does not parse as
/// [`AppStateSyncKeyData`]; per the read policy, a malformed record reads as
/// absent.
pub(crate) fn hydrate(category: SignalDataType, value: serde_json::Value) -> Option<SignalRecord> {
    match category {
        SignalDataType::AppStateSyncKey => match serde_json::from_value(value) {
            Ok(data) => Some(SignalRecord::AppStateSyncKey(data)),
            Err(error) => {
                tracing::warn!(%category, %error, "discarding malformed app-state sync key");
                None
            }
        },
        _ => Some(SignalRecord::Raw(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn category_names_match_the_record_format() {
        assert_eq!(SignalDataType::PreKey.as_str(), "pre-key");
        assert_eq!(SignalDataType::Session.as_str(), "session");
        assert_eq!(SignalDataType::SenderKey.as_str(), "sender-key");
        assert_eq!(SignalDataType::AppStateSyncKey.as_str(), "app-state-sync-key");
        assert_eq!(
            SignalDataType::AppStateSyncVersion.as_str(),
            "app-state-sync-version"
        );
        assert_eq!(SignalDataType::SenderKeyMemory.as_str(), "sender-key-memory");
    }

    #[test]
    fn record_key_concatenates_category_and_id() {
        assert_eq!(SignalDataType::PreKey.record_key("17"), "pre-key-17");
        assert_eq!(
            SignalDataType::Session.record_key("user@host:1"),
            "session-user@host:1"
        );
    }

    #[test]
    fn hydrate_rehydrates_app_state_sync_keys() {
        let value = json!({
            "keyData": {"type": "Buffer", "data": "AQIDBA=="},
            "fingerprint": {"rawId": 7, "currentIndex": 2, "deviceIndexes": [0, 1]},
            "timestamp": 1700000000
        });
        let record = hydrate(SignalDataType::AppStateSyncKey, value).unwrap();
        let data = record.as_app_state_sync_key().unwrap();
        assert_eq!(data.key_data.as_ref().unwrap().as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(data.fingerprint.as_ref().unwrap().raw_id, Some(7));
        assert_eq!(data.timestamp, Some(1700000000));
    }

    #[test]
    fn hydrate_leaves_other_categories_raw() {
        let value = json!({"whatever": ["shape", 42]});
        let record = hydrate(SignalDataType::Session, value.clone()).unwrap();
        assert_eq!(record.as_raw(), Some(&value));
    }

    #[test]
    fn hydrate_treats_malformed_sync_key_as_absent() {
        let value = json!({"keyData": "not a tagged buffer"});
        assert!(hydrate(SignalDataType::AppStateSyncKey, value).is_none());
    }
}
