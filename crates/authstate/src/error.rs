//! Error types for the chatwire-authstate crate.

use thiserror::Error;

/// Errors that can occur while opening or operating an auth-state store.
#[derive(Debug, Error)]
pub enum AuthStateError {
    /// Invalid storage configuration (bad folder path, missing database path,
    /// malformed table name). Fatal at open time; the store never opens.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Decryption failed (wrong secret, truncated or tampered envelope).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Filesystem I/O failure on a single record operation.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for AuthStateError {
    fn from(err: rusqlite::Error) -> Self {
        AuthStateError::Storage(err.to_string())
    }
}
