//! `RocksDB` storage backend, the log-structured default.
//!
//! Wraps the `rocksdb` crate behind the [`StorageBackend`] trait. All
//! operations are dispatched to a blocking thread via
//! [`tokio::task::spawn_blocking`] since `RocksDB` is a synchronous C++ library.
//!
//! Encryption happens above this layer (in the barrier). This backend treats
//! keys as opaque UTF-8 strings and values as opaque bytes, and relies on the
//! default bytewise comparator for key order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options};

use crate::{Entry, StorageBackend, StorageError, prefix_successor};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// Thread-safe (`Arc<DB>` internally) and safe to share across async tasks.
/// All blocking `RocksDB` calls are offloaded to the Tokio blocking thread pool.
/// The database is closed when the last clone is dropped.
///
/// # Examples
///
/// ```no_run
/// # use dstore_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/dstore/data").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open a `RocksDB` database at the given path.
    ///
    /// Creates the database directory if it does not exist. `RocksDB` holds
    /// an exclusive lock on the directory while open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` fails to open or create the
    /// database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "rocksdb engine opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn decode_key(raw: &[u8]) -> Result<String, StorageError> {
    String::from_utf8(raw.to_vec()).map_err(|e| StorageError::InvalidKey {
        reason: e.to_string(),
    })
}

/// Collect up to `limit` entries starting at `prefix` (or strictly after
/// `after`), stopping at the end of the prefix range.
fn scan_blocking(
    db: &Db,
    prefix: &str,
    after: Option<&str>,
    limit: usize,
) -> Result<Vec<Entry>, StorageError> {
    let start = match after {
        Some(after) if after >= prefix => after,
        _ => prefix,
    };
    let limit = if limit == 0 { usize::MAX } else { limit };
    let iter = db.iterator(IteratorMode::From(start.as_bytes(), Direction::Forward));

    let mut entries = Vec::new();
    for item in iter {
        if entries.len() >= limit {
            break;
        }
        let (k, v) = item.map_err(|e| StorageError::Scan {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;
        let key = decode_key(&k)?;
        if !key.starts_with(prefix) {
            break;
        }
        if after.is_some_and(|after| key.as_str() <= after) {
            continue;
        }
        entries.push(Entry {
            key,
            value: v.to_vec(),
        });
    }
    Ok(entries)
}

fn last_blocking(db: &Db, prefix: &str) -> Result<Option<Entry>, StorageError> {
    let upper = prefix_successor(prefix);
    let mode = match upper.as_deref() {
        // Reverse seek lands on the greatest key <= upper.
        Some(upper) => IteratorMode::From(upper.as_bytes(), Direction::Reverse),
        None => IteratorMode::End,
    };

    for item in db.iterator(mode) {
        let (k, v) = item.map_err(|e| StorageError::Seek {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;
        let key = decode_key(&k)?;
        if key.starts_with(prefix) {
            return Ok(Some(Entry {
                key,
                value: v.to_vec(),
            }));
        }
        if key.as_str() < prefix {
            break;
        }
    }
    Ok(None)
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            db.get(key.as_bytes()).map_err(|e| StorageError::Read {
                key,
                reason: e.to_string(),
            })
        })
        .await
        .map_err(StorageError::blocking)?
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || {
            db.put(key.as_bytes(), &value)
                .map_err(|e| StorageError::Write {
                    key,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(StorageError::blocking)?
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            // RocksDB deletes are blind; probe first to report existence.
            let existed = db
                .get_pinned(key.as_bytes())
                .map_err(|e| StorageError::Delete {
                    key: key.clone(),
                    reason: e.to_string(),
                })?
                .is_some();
            if existed {
                db.delete(key.as_bytes()).map_err(|e| StorageError::Delete {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
            }
            Ok(existed)
        })
        .await
        .map_err(StorageError::blocking)?
    }

    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        let after = after.map(str::to_owned);
        tokio::task::spawn_blocking(move || scan_blocking(&db, &prefix, after.as_deref(), limit))
            .await
            .map_err(StorageError::blocking)?
    }

    async fn last(&self, prefix: &str) -> Result<Option<Entry>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || last_blocking(&db, &prefix))
            .await
            .map_err(StorageError::blocking)?
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            db.get_pinned(key.as_bytes())
                .map(|v| v.is_some())
                .map_err(|e| StorageError::Read {
                    key,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(StorageError::blocking)?
    }
}
