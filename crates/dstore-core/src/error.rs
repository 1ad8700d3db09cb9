//! Error types for `dstore-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material or plaintext, only
//! paths and operation descriptions.

use dstore_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Segment encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// Segment decryption failed (wrong key, corrupted, reordered, or
    /// truncated ciphertext).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Ciphertext is too short to contain a header and a final tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Key material has the wrong length or encoding.
    #[error("invalid encryption key: {reason}")]
    InvalidKey { reason: String },

    /// The ciphertext header names a format this build cannot read.
    #[error("unsupported ciphertext version {version}")]
    UnsupportedVersion { version: u8 },
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("barrier storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors returned by the document store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store has not been opened, or has been closed.
    #[error("store is not open")]
    NotOpen,

    /// The store is already open.
    #[error("store is already open")]
    AlreadyOpen,

    /// The path cannot be used for this operation.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// `create` found an existing document.
    #[error("path already exists: {path}")]
    PathExists { path: String },

    /// A decrypted record names a different path than the one it was stored
    /// under. Signals corruption, a wrong key, or key confusion in the engine.
    #[error("record path mismatch: requested '{expected}', record holds '{actual}'")]
    PathMismatch { expected: String, actual: String },

    /// A stored record could not be decrypted.
    #[error("failed to decrypt record at '{path}': {source}")]
    Decryption {
        path: String,
        #[source]
        source: CryptoError,
    },

    /// A record could not be encrypted.
    #[error("failed to encrypt record at '{path}': {source}")]
    Encryption {
        path: String,
        #[source]
        source: CryptoError,
    },

    /// The storage engine failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be serialized or deserialized.
    #[error("record codec error at '{path}': {reason}")]
    Codec { path: String, reason: String },

    /// Collections can only be enumerated at the root.
    #[error("only root collections supported, got parent '{parent}'")]
    NestedCollections { parent: String },

    /// The fixed-width identifier space of an increment counter is used up.
    #[error("increment counter at '{path}' exhausted its identifier space")]
    IncrementExhausted { path: String },

    /// The iterator was released and cannot be stepped again.
    #[error("iterator has been released")]
    IteratorReleased,

    /// The store the iterator was created from was closed (or re-opened).
    #[error("iterator outlived the store it was created from")]
    IteratorInvalidated,

    /// The caller's cancellation signal fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's deadline passed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The store configuration cannot be used.
    #[error("invalid store config: {reason}")]
    Config { reason: String },
}

impl StoreError {
    /// Attach a path to a barrier failure.
    pub(crate) fn from_barrier(path: &str, err: BarrierError) -> Self {
        match err {
            BarrierError::Storage(e) => Self::Storage(e),
            BarrierError::Crypto(e @ CryptoError::Encryption { .. }) => Self::Encryption {
                path: path.to_owned(),
                source: e,
            },
            BarrierError::Crypto(e) => Self::Decryption {
                path: path.to_owned(),
                source: e,
            },
        }
    }
}
