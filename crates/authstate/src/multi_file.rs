//! File-backed session state: one record per file in a session folder.
//!
//! The store keeps the credential bundle in `creds.json` and every key record
//! in `<category>-<id>.json` inside one directory. Record names pass through a
//! two-substitution path codec (`/` → `__`, `:` → `-`); record contents are
//! JSON, or an encrypted envelope of it when the store is opened with a
//! secret. All filesystem access to one path is serialized through the
//! per-path gate, so concurrent batch operations never interleave on a single
//! file.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::cipher::RecordCipher;
use crate::creds::{init_auth_creds, AuthenticationCreds};
use crate::error::AuthStateError;
use crate::path_lock::PathLockMap;
use crate::types::{hydrate, SignalDataType, SignalKeyMap, SignalKeyStore, SignalKeyUpdates};

const CREDS_FILE: &str = "creds.json";
const RECORD_EXTENSION: &str = ".json";

/// Replace the two characters with filesystem/OS meaning in record names.
///
/// Only `/` and `:` are substituted; identifiers outside the range these two
/// substitutions can disambiguate are the caller's responsibility.
fn sanitize_file_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}

/// Read/write/delete of one named record on disk, composing the path codec,
/// the optional cipher, and the per-path gate.
struct FileRecordStore {
    folder: PathBuf,
    cipher: Option<RecordCipher>,
    gate: PathLockMap,
}

impl FileRecordStore {
    fn record_path(&self, name: &str) -> PathBuf {
        self.folder.join(sanitize_file_name(name))
    }

    /// Overwrite the record's full contents, creating the file if absent.
    async fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), AuthStateError> {
        let serialized = serde_json::to_vec(value)?;
        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&serialized)?.into_bytes(),
            None => serialized,
        };
        let path = self.record_path(name);
        let _permit = self.gate.acquire(&path).await;
        tokio::fs::write(&path, payload).await?;
        Ok(())
    }

    /// Read a record, or `None` if it is absent.
    ///
    /// Any I/O, decryption, or parse failure also reads as absent: a degraded
    /// read is recoverable upstream (the key gets re-negotiated) while a
    /// thrown error would take down the whole session. Degradations other
    /// than a missing file are logged.
    async fn read<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.record_path(name);
        let raw = {
            let _permit = self.gate.acquire(&path).await;
            tokio::fs::read(&path).await
        };
        let raw = match raw {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return None,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "treating unreadable record as absent"
                );
                return None;
            }
        };
        let plaintext = match &self.cipher {
            Some(cipher) => match cipher.decrypt(&raw) {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "treating undecryptable record as absent"
                    );
                    return None;
                }
            },
            None => raw,
        };
        match serde_json::from_slice(&plaintext) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "treating unparsable record as absent"
                );
                None
            }
        }
    }

    /// Delete a record. Deleting an absent record is a no-op.
    async fn remove(&self, name: &str) -> Result<(), AuthStateError> {
        let path = self.record_path(name);
        let _permit = self.gate.acquire(&path).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Session state persisted as a folder of per-record files.
pub struct MultiFileAuthState {
    store: FileRecordStore,
    /// The in-memory credential bundle. Callers mutate it directly between
    /// [`save_creds`](Self::save_creds) calls.
    pub creds: RwLock<AuthenticationCreds>,
}

impl MultiFileAuthState {
    /// Open (or bootstrap) the session folder.
    ///
    /// A missing folder is created recursively. An existing non-directory
    /// entry at the path is a fatal configuration error. With a `secret`,
    /// every record including the credential bundle is stored encrypted.
    /// Loads the stored credential bundle, materializing a fresh one if none
    /// exists yet.
    pub async fn open(
        folder: impl Into<PathBuf>,
        secret: Option<&str>,
    ) -> Result<Self, AuthStateError> {
        let folder = folder.into();
        match tokio::fs::metadata(&folder).await {
            Ok(meta) if !meta.is_dir() => {
                return Err(AuthStateError::Configuration(format!(
                    "found something that is not a directory at {}, \
                     either delete it or specify a different location",
                    folder.display()
                )));
            }
            Ok(_) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&folder).await?;
            }
            Err(error) => return Err(error.into()),
        }

        let store = FileRecordStore {
            folder,
            cipher: secret.map(RecordCipher::new),
            gate: PathLockMap::new(),
        };
        let creds = match store.read::<AuthenticationCreds>(CREDS_FILE).await {
            Some(creds) => creds,
            None => init_auth_creds(),
        };
        tracing::debug!(
            folder = %store.folder.display(),
            encrypted = store.cipher.is_some(),
            "opened multi-file auth state"
        );

        Ok(MultiFileAuthState {
            store,
            creds: RwLock::new(creds),
        })
    }

    /// Persist the current in-memory credential bundle.
    pub async fn save_creds(&self) -> Result<(), AuthStateError> {
        let creds = self.creds.read().await;
        self.store.write(CREDS_FILE, &*creds).await
    }

    fn record_file(category: SignalDataType, id: &str) -> String {
        format!("{}{}", category.record_key(id), RECORD_EXTENSION)
    }
}

#[async_trait]
impl SignalKeyStore for MultiFileAuthState {
    async fn get(
        &self,
        category: SignalDataType,
        ids: &[String],
    ) -> Result<SignalKeyMap, AuthStateError> {
        let fetches = ids.iter().map(|id| async move {
            let value = self
                .store
                .read::<serde_json::Value>(&Self::record_file(category, id))
                .await;
            (id.clone(), value.and_then(|v| hydrate(category, v)))
        });
        Ok(join_all(fetches).await.into_iter().collect())
    }

    async fn set(&self, updates: SignalKeyUpdates) -> Result<(), AuthStateError> {
        let mut tasks = Vec::new();
        for (category, entries) in &updates {
            for (id, value) in entries {
                let file = Self::record_file(*category, id);
                tasks.push(async move {
                    match value {
                        Some(value) => self.store.write(&file, value).await,
                        None => self.store.remove(&file).await,
                    }
                });
            }
        }
        // join_all rather than a short-circuiting combinator: the whole batch
        // settles before the first failure is surfaced.
        for result in join_all(tasks).await {
            result?;
        }
        Ok(())
    }
}
