//! Error types for rollcall-sync

use thiserror::Error;

use crate::models::ActionId;

/// Result type alias using rollcall-sync's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in rollcall-sync operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage cannot persist or read queue records. The engine degrades
    /// to a session-only in-memory queue rather than losing stored data.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Transient network failure during delivery; retried with backoff
    #[error("Transient network error: {0}")]
    NetworkTransient(String),

    /// The server definitively rejected an action
    #[error("Server rejected action: {0}")]
    ServerRejected(String),

    /// Another context already claimed the action (benign, detect-and-skip)
    #[error("Action {0} already claimed by another sync context")]
    ConflictSkipped(ActionId),

    /// Action not found
    #[error("Action not found: {0}")]
    NotFound(ActionId),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error means local persistence is unusable this session.
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::LibSql(_))
    }
}
