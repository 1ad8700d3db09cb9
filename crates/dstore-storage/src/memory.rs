//! Volatile engine used by tests and by `DSTORE_BACKEND=memory`.
//!
//! Entries live in an ordered map, so range scans and seek-to-end are plain
//! `BTreeMap::range` calls. Clones share one map: a test can close a store
//! and re-open it over the same entries to exercise restarts without disk.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{Entry, StorageBackend, StorageError, prefix_successor};

/// Ordered in-memory engine. Nothing survives the last clone.
///
/// # Examples
///
/// ```
/// # use dstore_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("/keys/alice", b"data").await.unwrap();
/// let val = backend.get("/keys/alice").await.unwrap();
/// assert_eq!(val, Some(b"data".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// An empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Overwrite a stored value in place, bypassing any higher layer.
    ///
    /// Intended for tests that simulate on-disk corruption. Returns `false`
    /// if the key does not exist.
    pub async fn corrupt(&self, key: &str, f: impl FnOnce(&mut Vec<u8>)) -> bool {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(value) => {
                f(value);
                true
            }
            None => false,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower bound for a scan: strictly after `after` if it lies inside or past
/// the prefix range, otherwise the prefix itself.
fn lower_bound<'a>(prefix: &'a str, after: Option<&'a str>) -> Bound<&'a str> {
    match after {
        Some(after) if after >= prefix => Bound::Excluded(after),
        _ => Bound::Included(prefix),
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write().await;
        data.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, StorageError> {
        let data = self.data.read().await;
        let limit = if limit == 0 { usize::MAX } else { limit };
        let entries = data
            .range::<str, _>((lower_bound(prefix, after), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| Entry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        Ok(entries)
    }

    async fn scan_keys(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let limit = if limit == 0 { usize::MAX } else { limit };
        let keys = data
            .range::<str, _>((lower_bound(prefix, after), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }

    async fn last(&self, prefix: &str) -> Result<Option<Entry>, StorageError> {
        let data = self.data.read().await;
        let upper = prefix_successor(prefix);
        let upper = match upper.as_deref() {
            Some(upper) => Bound::Excluded(upper),
            None => Bound::Unbounded,
        };
        let entry = data
            .range::<str, _>((Bound::Included(prefix), upper))
            .next_back()
            .map(|(k, v)| Entry {
                key: k.clone(),
                value: v.clone(),
            });
        Ok(entry)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }
}
