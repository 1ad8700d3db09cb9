//! Store configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! All settings can be overridden via `DSTORE_*` environment variables.

use std::sync::Arc;

use dstore_storage::{MemoryBackend, StorageBackend};
use tracing::info;

use crate::error::StoreError;

/// Default number of entries an iterator reads from the engine per page.
pub const DEFAULT_PAGE_SIZE: usize = 128;

/// Supported storage engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// In-memory (tests only, data lost on close).
    Memory,
    /// `RocksDB` log-structured storage.
    #[default]
    RocksDb,
    /// redb B-tree storage.
    Redb,
    /// PostgreSQL; the open path is the connection URL.
    Postgres,
}

impl BackendKind {
    /// Parse a backend name as accepted in `DSTORE_BACKEND`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "rocksdb" => Some(Self::RocksDb),
            "redb" => Some(Self::Redb),
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Engine opened by `Store::open_at_path`.
    pub backend: BackendKind,
    /// Entries fetched from the engine per iterator page.
    pub page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DSTORE_BACKEND`: `memory`, `rocksdb`, `redb`, or `postgres` (default: `rocksdb`)
    /// - `DSTORE_PAGE_SIZE`: iterator page size (default: `128`, minimum `1`)
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let backend = lookup("DSTORE_BACKEND")
            .and_then(|v| BackendKind::parse(&v))
            .unwrap_or_default();

        let page_size = lookup("DSTORE_PAGE_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .max(1);

        Self { backend, page_size }
    }
}

/// Open the configured engine at `path`.
///
/// # Errors
///
/// - [`StoreError::Storage`] if the engine fails to open.
/// - [`StoreError::Config`] if the engine was not compiled in.
#[cfg_attr(
    not(any(
        feature = "rocksdb-backend",
        feature = "redb-backend",
        feature = "postgres-backend"
    )),
    allow(unused_variables)
)]
pub(crate) async fn open_backend(
    kind: BackendKind,
    path: &str,
) -> Result<Arc<dyn StorageBackend>, StoreError> {
    let backend: Arc<dyn StorageBackend> = match kind {
        BackendKind::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryBackend::new())
        }
        #[cfg(feature = "rocksdb-backend")]
        BackendKind::RocksDb => {
            info!(path = %path, "using RocksDB storage");
            Arc::new(dstore_storage::RocksDbBackend::open(path)?)
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        BackendKind::RocksDb => {
            return Err(StoreError::Config {
                reason: "RocksDB backend requested but feature 'rocksdb-backend' is not enabled"
                    .to_owned(),
            });
        }
        #[cfg(feature = "redb-backend")]
        BackendKind::Redb => {
            info!(path = %path, "using redb storage");
            Arc::new(dstore_storage::RedbBackend::open(path)?)
        }
        #[cfg(not(feature = "redb-backend"))]
        BackendKind::Redb => {
            return Err(StoreError::Config {
                reason: "redb backend requested but feature 'redb-backend' is not enabled"
                    .to_owned(),
            });
        }
        #[cfg(feature = "postgres-backend")]
        BackendKind::Postgres => {
            info!("using PostgreSQL storage");
            Arc::new(dstore_storage::PostgresBackend::connect(path).await?)
        }
        #[cfg(not(feature = "postgres-backend"))]
        BackendKind::Postgres => {
            return Err(StoreError::Config {
                reason: "PostgreSQL backend requested but feature 'postgres-backend' is not enabled"
                    .to_owned(),
            });
        }
    };
    Ok(backend)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = StoreConfig::from_lookup(lookup(&[]));
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.backend, BackendKind::RocksDb);
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn reads_backend_and_page_size() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("DSTORE_BACKEND", "Redb"),
            ("DSTORE_PAGE_SIZE", "16"),
        ]));
        assert_eq!(config.backend, BackendKind::Redb);
        assert_eq!(config.page_size, 16);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = StoreConfig::from_lookup(lookup(&[
            ("DSTORE_BACKEND", "cassandra"),
            ("DSTORE_PAGE_SIZE", "0"),
        ]));
        assert_eq!(config.backend, BackendKind::RocksDb);
        assert_eq!(config.page_size, 1);
    }

    #[test]
    fn parses_postgres_aliases() {
        assert_eq!(BackendKind::parse("postgresql"), Some(BackendKind::Postgres));
        assert_eq!(BackendKind::parse(" memory "), Some(BackendKind::Memory));
        assert_eq!(BackendKind::parse("sqlite"), None);
    }

    #[tokio::test]
    async fn memory_backend_opens_anywhere() {
        let backend = open_backend(BackendKind::Memory, "ignored").await.unwrap();
        assert!(!backend.exists("/x").await.unwrap());
    }
}
