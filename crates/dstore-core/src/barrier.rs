//! Encryption barrier for `dstore`.
//!
//! Every value that touches the storage engine passes through the barrier's
//! encrypt/decrypt. The engine only ever sees ciphertext.
//!
//! # Security model
//!
//! - The store secret lives only in process memory and is zeroized when the
//!   barrier is dropped (on store close).
//! - Values are sealed with streaming AES-256-GCM (fresh nonce per write).
//! - Keys (document paths) are stored in cleartext to support prefix scans.
//! - Scans return ciphertext; callers decrypt entry by entry, so a listing
//!   only pays for the values it actually yields.

use std::fmt;
use std::sync::Arc;

use dstore_storage::{Entry, StorageBackend};

use crate::crypto::{self, EncryptionKey};
use crate::error::BarrierError;

/// The encryption barrier wrapping a storage backend.
///
/// All reads decrypt, all writes encrypt.
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    key: EncryptionKey,
}

impl Barrier {
    /// Create a barrier sealing values for `storage` under `key`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, key: EncryptionKey) -> Self {
        Self { storage, key }
    }

    /// Read a value from storage, decrypting it through the barrier.
    ///
    /// Returns `Ok(None)` if the key does not exist in storage.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Crypto`] if decryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        match self.storage.get(key).await? {
            None => Ok(None),
            Some(ciphertext) => Ok(Some(crypto::decrypt(&self.key, &ciphertext)?)),
        }
    }

    /// Write a value to storage, encrypting it through the barrier.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Crypto`] if encryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), BarrierError> {
        let ciphertext = crypto::encrypt(&self.key, value)?;
        self.storage.put(key, &ciphertext).await?;
        Ok(())
    }

    /// Delete a key from storage, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the storage backend fails.
    pub async fn delete(&self, key: &str) -> Result<bool, BarrierError> {
        Ok(self.storage.delete(key).await?)
    }

    /// Check whether a key exists in storage.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the storage backend fails.
    pub async fn exists(&self, key: &str) -> Result<bool, BarrierError> {
        Ok(self.storage.exists(key).await?)
    }

    /// Read one page of still-encrypted entries.
    ///
    /// Pass each entry to [`open_entry`](Barrier::open_entry) to decrypt it.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the storage backend fails.
    pub async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, BarrierError> {
        Ok(self.storage.scan(prefix, after, limit).await?)
    }

    /// Read one page of keys, without touching values.
    ///
    /// Paths are stored in cleartext, so no decryption is needed.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the storage backend fails.
    pub async fn scan_keys(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, BarrierError> {
        Ok(self.storage.scan_keys(prefix, after, limit).await?)
    }

    /// Decrypt the value of an entry returned by [`scan`](Barrier::scan).
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Crypto`] if decryption fails.
    pub fn open_entry(&self, entry: &Entry) -> Result<Vec<u8>, BarrierError> {
        Ok(crypto::decrypt(&self.key, &entry.value)?)
    }

    /// Read and decrypt the greatest entry whose key starts with `prefix`.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Crypto`] if decryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn last(&self, prefix: &str) -> Result<Option<(String, Vec<u8>)>, BarrierError> {
        match self.storage.last(prefix).await? {
            None => Ok(None),
            Some(entry) => {
                let plaintext = self.open_entry(&entry)?;
                Ok(Some((entry.key, plaintext)))
            }
        }
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
