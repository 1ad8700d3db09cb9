//! PostgreSQL storage backend.
//!
//! Stores all documents in a single `kv_store` table. Keys are UTF-8 paths
//! under the `"C"` collation so that `ORDER BY key` matches the byte-wise
//! order of the other engines; values are opaque encrypted bytes. The
//! barrier encrypts all data before it reaches this layer.
//!
//! Feature-gated behind `postgres-backend`. Uses `sqlx` with the Tokio
//! runtime for fully async operations; no `spawn_blocking` needed.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::{Entry, StorageBackend, StorageError};

/// A storage backend backed by PostgreSQL.
///
/// Thread-safe via `PgPool` (connection pool). All operations are fully async.
///
/// # Examples
///
/// ```no_run
/// # use dstore_storage::PostgresBackend;
/// # #[tokio::main]
/// # async fn main() {
/// let backend = PostgresBackend::connect("postgres://localhost/dstore").await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

/// Build a `LIKE` pattern matching every key that starts with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len().saturating_add(1));
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn sql_limit(limit: usize) -> Option<i64> {
    if limit == 0 {
        None
    } else {
        Some(i64::try_from(limit).unwrap_or(i64::MAX))
    }
}

impl PostgresBackend {
    /// Connect to PostgreSQL and run the initial migration.
    ///
    /// Creates the `kv_store` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Open {
                path: "[redacted]".to_owned(),
                reason: e.to_string(),
            })?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (\
                key   TEXT COLLATE \"C\" PRIMARY KEY, \
                value BYTEA NOT NULL\
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Open {
            path: "[redacted]".to_owned(),
            reason: format!("migration failed: {e}"),
        })?;
        tracing::debug!("postgres engine connected, kv_store table ready");

        Ok(Self { pool })
    }

    /// Return a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl StorageBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO kv_store (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn scan(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Entry>, StorageError> {
        let rows: Vec<(String, Vec<u8>)> = sqlx::query_as(
            "SELECT key, value FROM kv_store \
             WHERE key LIKE $1 ESCAPE '\\' AND ($2::TEXT IS NULL OR key > $2) \
             ORDER BY key LIMIT $3",
        )
        .bind(like_prefix(prefix))
        .bind(after)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Scan {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| Entry { key, value })
            .collect())
    }

    async fn scan_keys(
        &self,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, StorageError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM kv_store \
             WHERE key LIKE $1 ESCAPE '\\' AND ($2::TEXT IS NULL OR key > $2) \
             ORDER BY key LIMIT $3",
        )
        .bind(like_prefix(prefix))
        .bind(after)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Scan {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(rows.into_iter().map(|(k,)| k).collect())
    }

    async fn last(&self, prefix: &str) -> Result<Option<Entry>, StorageError> {
        let row: Option<(String, Vec<u8>)> = sqlx::query_as(
            "SELECT key, value FROM kv_store WHERE key LIKE $1 ESCAPE '\\' \
             ORDER BY key DESC LIMIT 1",
        )
        .bind(like_prefix(prefix))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Seek {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(row.map(|(key, value)| Entry { key, value }))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let row: Option<(bool,)> =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM kv_store WHERE key = $1)")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Read {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })?;

        Ok(row.is_some_and(|(e,)| e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("/a_b/"), "/a\\_b/%");
        assert_eq!(like_prefix("100%"), "100\\%%");
        assert_eq!(like_prefix(""), "%");
    }

    #[test]
    fn zero_limit_is_unbounded() {
        assert_eq!(sql_limit(0), None);
        assert_eq!(sql_limit(5), Some(5));
    }
}
