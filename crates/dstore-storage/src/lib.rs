//! Raw storage engines for `dstore`.
//!
//! This crate defines the [`StorageBackend`] trait: an ordered key-value
//! interface that knows nothing about documents, records, or encryption. The
//! barrier in `dstore-core` wraps a storage backend so that every value is
//! ciphertext before it reaches this layer. Keys are cleartext paths and are
//! kept in byte-wise lexicographic order so that prefix ranges can be scanned.
//!
//! Four implementations are provided:
//!
//! - [`RocksDbBackend`]: log-structured engine, the default (feature `rocksdb-backend`)
//! - [`RedbBackend`]: pure-Rust B-tree engine (feature `redb-backend`)
//! - [`PostgresBackend`]: relational engine (feature `postgres-backend`)
//! - [`MemoryBackend`]: in-memory, for testing

mod error;
mod memory;
#[cfg(feature = "postgres-backend")]
mod postgres_backend;
#[cfg(feature = "redb-backend")]
mod redb_backend;
#[cfg(feature = "rocksdb-backend")]
mod rocksdb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "postgres-backend")]
pub use postgres_backend::PostgresBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
#[cfg(feature = "rocksdb-backend")]
pub use rocksdb_backend::RocksDbBackend;

/// A raw key/value pair read from an engine.
///
/// Both halves are owned copies; nothing borrows engine-internal buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The cleartext key.
    pub key: String,
    /// The stored value, exactly as written.
    pub value: Vec<u8>,
}

/// A pluggable, key-ordered storage engine.
///
/// Keys are UTF-8 paths using `/` as a separator (e.g. `/keys/alice`).
/// Values are opaque byte arrays, always encrypted by the barrier before
/// reaching storage.
///
/// Implementations must iterate keys in byte-wise lexicographic order and be
/// safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key, returning whether it existed.
    ///
    /// Deleting a non-existent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List all keys that start with the given prefix, in key order.
    ///
    /// The default implementation is an unlimited
    /// [`scan_keys`](StorageBackend::scan_keys).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Scan`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.scan_keys(prefix, None, 0).await
    }

    /// Read one page of entries whose keys start with `prefix`.
    ///
    /// Entries are returned in key order, starting strictly after `after`
    /// when it is given. At most `limit` entries are returned; `0` means no
    /// limit. An empty page means the range is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Scan`] if the underlying backend fails.
    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, StorageError>;

    /// Like [`scan`](StorageBackend::scan) but returns keys only.
    ///
    /// The default implementation drops the values from a full scan.
    /// Backends that can avoid reading values should override it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Scan`] if the underlying backend fails.
    async fn scan_keys(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let entries = self.scan(prefix, after, limit).await?;
        Ok(entries.into_iter().map(|e| e.key).collect())
    }

    /// Return the entry with the greatest key that starts with `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Seek`] if the underlying backend fails.
    async fn last(&self, prefix: &str) -> Result<Option<Entry>, StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Compute the smallest string greater than every string starting with
/// `prefix`.
///
/// Returns `None` when no such bound exists (empty prefix, or a prefix made
/// only of `char::MAX`), meaning the range is unbounded above.
///
/// ```
/// # use dstore_storage::prefix_successor;
/// assert_eq!(prefix_successor("/a/b").as_deref(), Some("/a/c"));
/// assert_eq!(prefix_successor(""), None);
/// ```
#[must_use]
pub fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(c) = chars.pop() {
        let mut next = u32::from(c) + 1;
        // Skip the surrogate block, which has no `char` values.
        if next == 0xD800 {
            next = 0xE000;
        }
        if let Some(succ) = char::from_u32(next) {
            chars.push(succ);
            return Some(chars.into_iter().collect());
        }
    }
    None
}
