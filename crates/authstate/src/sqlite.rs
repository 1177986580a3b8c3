//! SQLite-backed session state: one row per record in a unique-keyed table.
//!
//! Same logical contract as the file backend, with the directory swapped for
//! a table (`key TEXT PRIMARY KEY, data TEXT`), file writes for native
//! upserts, and an explicit [`close`](SqliteAuthState::close) releasing the
//! connection. Row keys are the undecorated `<category>-<id>` strings; no
//! path sanitizing applies since they never touch the filesystem.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::creds::{init_auth_creds, AuthenticationCreds};
use crate::error::AuthStateError;
use crate::types::{hydrate, SignalDataType, SignalKeyMap, SignalKeyStore, SignalKeyUpdates};

const DEFAULT_TABLE: &str = "auth_state";
const CREDS_KEY: &str = "creds";

/// Connection parameters for the SQLite backend.
#[derive(Debug, Clone)]
pub struct SqliteAuthConfig {
    /// Path to the database file. Required.
    pub database_path: PathBuf,
    /// Record table name. Defaults to `auth_state`; must be a bare SQL
    /// identifier since it is spliced into the schema statements.
    pub table_name: Option<String>,
}

impl SqliteAuthConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        SqliteAuthConfig {
            database_path: database_path.into(),
            table_name: None,
        }
    }
}

/// Session state persisted in a SQLite table.
pub struct SqliteAuthState {
    conn: Mutex<Connection>,
    table: String,
    /// The in-memory credential bundle. Callers mutate it directly between
    /// [`save_creds`](Self::save_creds) calls.
    pub creds: RwLock<AuthenticationCreds>,
}

impl SqliteAuthState {
    /// Open the database, create the record table if absent, and load or
    /// materialize the credential bundle.
    pub async fn open(config: SqliteAuthConfig) -> Result<Self, AuthStateError> {
        if config.database_path.as_os_str().is_empty() {
            return Err(AuthStateError::Configuration(
                "database path is required".into(),
            ));
        }
        let table = config
            .table_name
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        if !is_bare_identifier(&table) {
            return Err(AuthStateError::Configuration(format!(
                "table name must be a bare SQL identifier: {table}"
            )));
        }

        let conn = Connection::open(&config.database_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;",
        )?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 key TEXT PRIMARY KEY,
                 data TEXT NOT NULL,
                 updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
             );"
        ))?;

        let creds = match read_data::<AuthenticationCreds>(&conn, &table, CREDS_KEY) {
            Some(creds) => creds,
            None => init_auth_creds(),
        };
        tracing::debug!(
            path = %config.database_path.display(),
            %table,
            "opened sqlite auth state"
        );

        Ok(SqliteAuthState {
            conn: Mutex::new(conn),
            table,
            creds: RwLock::new(creds),
        })
    }

    /// Boundary convenience for the common case: default table name.
    pub async fn open_path(database_path: impl Into<PathBuf>) -> Result<Self, AuthStateError> {
        Self::open(SqliteAuthConfig::new(database_path)).await
    }

    /// Persist the current in-memory credential bundle.
    pub async fn save_creds(&self) -> Result<(), AuthStateError> {
        let creds = self.creds.read().await;
        write_data(&self.lock_conn(), &self.table, CREDS_KEY, &*creds)
    }

    /// Release the underlying connection.
    pub fn close(self) -> Result<(), AuthStateError> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        conn.close()
            .map_err(|(_, error)| AuthStateError::Storage(error.to_string()))
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SignalKeyStore for SqliteAuthState {
    async fn get(
        &self,
        category: SignalDataType,
        ids: &[String],
    ) -> Result<SignalKeyMap, AuthStateError> {
        let conn = self.lock_conn();
        let mut records = HashMap::with_capacity(ids.len());
        for id in ids {
            let value =
                read_data::<serde_json::Value>(&conn, &self.table, &category.record_key(id));
            records.insert(id.clone(), value.and_then(|v| hydrate(category, v)));
        }
        Ok(records)
    }

    async fn set(&self, updates: SignalKeyUpdates) -> Result<(), AuthStateError> {
        let conn = self.lock_conn();
        let mut first_error = None;
        for (category, entries) in &updates {
            for (id, value) in entries {
                let key = category.record_key(id);
                let result = match value {
                    Some(value) => write_data(&conn, &self.table, &key, value),
                    None => remove_data(&conn, &self.table, &key),
                };
                if let Err(error) = result {
                    if first_error.is_none() {
                        first_error = Some(error);
                    } else {
                        tracing::warn!(%key, %error, "additional failure in record batch");
                    }
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn write_data(
    conn: &Connection,
    table: &str,
    key: &str,
    value: &impl Serialize,
) -> Result<(), AuthStateError> {
    let serialized = serde_json::to_string(value)?;
    conn.execute(
        &format!(
            "INSERT INTO {table} (key, data) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET data = excluded.data,
                                            updated_at = CURRENT_TIMESTAMP"
        ),
        rusqlite::params![key, serialized],
    )?;
    Ok(())
}

fn read_data<T: DeserializeOwned>(conn: &Connection, table: &str, key: &str) -> Option<T> {
    let row: Option<String> = match conn
        .query_row(
            &format!("SELECT data FROM {table} WHERE key = ?1"),
            [key],
            |row| row.get(0),
        )
        .optional()
    {
        Ok(row) => row,
        Err(error) => {
            tracing::warn!(key, %error, "treating unreadable record as absent");
            return None;
        }
    };
    match serde_json::from_str(&row?) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(key, %error, "treating unparsable record as absent");
            None
        }
    }
}

fn remove_data(conn: &Connection, table: &str, key: &str) -> Result<(), AuthStateError> {
    conn.execute(&format!("DELETE FROM {table} WHERE key = ?1"), [key])?;
    Ok(())
}

fn is_bare_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
