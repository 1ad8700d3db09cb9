//! Storage error types.
//!
//! Variants name the engine operation that failed and the key or range it
//! touched. Values never appear in an error; they are ciphertext anyway.

use tokio::task::JoinError;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The engine could not be opened at `path` (a directory, file, or
    /// connection URL with its credentials removed).
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// A point read failed.
    #[error("failed to read key '{key}': {reason}")]
    Read { key: String, reason: String },

    /// A point write failed.
    #[error("failed to write key '{key}': {reason}")]
    Write { key: String, reason: String },

    /// A point delete failed.
    #[error("failed to delete key '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// A forward range scan failed.
    #[error("failed to scan range '{prefix}': {reason}")]
    Scan { prefix: String, reason: String },

    /// Seeking to the end of a bounded range failed.
    #[error("failed to seek to the end of range '{prefix}': {reason}")]
    Seek { prefix: String, reason: String },

    /// The engine's key table is missing.
    #[error("missing table '{name}'")]
    MissingTable { name: String },

    /// Beginning or committing an engine transaction failed.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },

    /// A stored key is not valid UTF-8, so it cannot be a document path.
    #[error("invalid key encoding: {reason}")]
    InvalidKey { reason: String },

    /// A blocking engine call was cancelled or panicked on its worker thread.
    #[error("blocking engine task failed: {0}")]
    Blocking(#[source] JoinError),
}

impl StorageError {
    /// Map a failed `spawn_blocking` join.
    #[cfg_attr(
        not(any(feature = "rocksdb-backend", feature = "redb-backend")),
        allow(dead_code)
    )]
    pub(crate) fn blocking(err: JoinError) -> Self {
        Self::Blocking(err)
    }
}
