//! Pure-Rust redb storage backend.
//!
//! An alternative to `RocksDB` for environments where a pure-Rust build is
//! required (no C++ FFI). Feature-gated behind `redb-backend`.
//!
//! redb uses a B-tree internally; `&str` keys compare byte-wise, which gives
//! the same ordering as the other engines. All operations are transactional.

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::{Entry, StorageBackend, StorageError, prefix_successor};

/// The single table used for all documents.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("data");

/// A storage backend backed by redb (pure Rust, B-tree based).
///
/// Thread-safe via `Arc<Database>`. Blocking redb calls are offloaded to the
/// Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use dstore_storage::RedbBackend;
/// let backend = RedbBackend::open("/var/lib/dstore/data.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("data: {e}"),
    }
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if redb fails to open or create the
    /// database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Opening the table in a write txn creates it if missing.
        let txn = db.begin_write().map_err(txn_err)?;
        {
            let _table = txn.open_table(DATA_TABLE).map_err(table_err)?;
        }
        txn.commit().map_err(txn_err)?;
        tracing::debug!(path = %path.display(), "redb engine opened");

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

    fn scan_blocking(
        db: &Database,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, StorageError> {
        let txn = db.begin_read().map_err(txn_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(table_err)?;
        let scan_err = |e: redb::StorageError| StorageError::Scan {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        };

        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after),
            _ => Bound::Included(prefix),
        };
        let limit = if limit == 0 { usize::MAX } else { limit };

        let mut entries = Vec::new();
        for item in table
            .range::<&str>((lower, Bound::Unbounded))
            .map_err(scan_err)?
        {
            if entries.len() >= limit {
                break;
            }
            let (k, v) = item.map_err(scan_err)?;
            let key = k.value();
            if !key.starts_with(prefix) {
                break;
            }
            entries.push(Entry {
                key: key.to_owned(),
                value: v.value().to_vec(),
            });
        }
        Ok(entries)
    }

    fn last_blocking(db: &Database, prefix: &str) -> Result<Option<Entry>, StorageError> {
        let txn = db.begin_read().map_err(txn_err)?;
        let table = txn.open_table(DATA_TABLE).map_err(table_err)?;
        let seek_err = |e: redb::StorageError| StorageError::Seek {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        };

        let upper = prefix_successor(prefix);
        let upper = match upper.as_deref() {
            Some(upper) => Bound::Excluded(upper),
            None => Bound::Unbounded,
        };
        let mut range = table
            .range::<&str>((Bound::Included(prefix), upper))
            .map_err(seek_err)?;
        match range.next_back() {
            Some(item) => {
                let (k, v) = item.map_err(seek_err)?;
                Ok(Some(Entry {
                    key: k.value().to_owned(),
                    value: v.value().to_vec(),
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(DATA_TABLE).map_err(table_err)?;
            let result = table
                .get(key.as_str())
                .map_err(|e| StorageError::Read {
                    key: key.clone(),
                    reason: e.to_string(),
                })?
                .map(|v| v.value().to_vec());
            Ok(result)
        })
        .await
        .map_err(StorageError::blocking)?
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        let value = value.to_vec();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(txn_err)?;
            {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_err)?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
            }
            txn.commit().map_err(txn_err)?;
            Ok(())
        })
        .await
        .map_err(StorageError::blocking)?
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(txn_err)?;
            let existed = {
                let mut table = txn.open_table(DATA_TABLE).map_err(table_err)?;
                table
                    .remove(key.as_str())
                    .map_err(|e| StorageError::Delete {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?
                    .is_some()
            };
            txn.commit().map_err(txn_err)?;
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
        tokio::task::spawn_blocking(move || {
            Self::scan_blocking(&db, &prefix, after.as_deref(), limit)
        })
        .await
        .map_err(StorageError::blocking)?
    }

    async fn last(&self, prefix: &str) -> Result<Option<Entry>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || Self::last_blocking(&db, &prefix))
            .await
            .map_err(StorageError::blocking)?
    }
}
