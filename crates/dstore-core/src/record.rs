//! On-disk record codec.
//!
//! A record is the JSON encoding of `(path, values, created_at, updated_at)`.
//! It is encrypted as one blob by the barrier. The embedded path is checked
//! on every decode: a record must describe the key it was read from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Document, Values};
use crate::error::StoreError;

/// The plaintext form of a stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Record {
    pub(crate) path: String,
    #[serde(default)]
    pub(crate) values: Values,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

/// Describe a codec failure by position only; serde messages can quote the
/// offending plaintext.
fn describe(err: &serde_json::Error) -> String {
    format!(
        "{:?} error at line {} column {}",
        err.classify(),
        err.line(),
        err.column()
    )
}

impl Record {
    /// Serialize for encryption.
    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|e| StoreError::Codec {
            path: self.path.clone(),
            reason: describe(&e),
        })
    }

    /// Deserialize a decrypted record read from `path`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Codec`] if the bytes are not a record.
    /// - [`StoreError::PathMismatch`] if the record names another path.
    pub(crate) fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, StoreError> {
        let record: Self = serde_json::from_slice(bytes).map_err(|e| StoreError::Codec {
            path: path.to_owned(),
            reason: describe(&e),
        })?;
        if record.path != path {
            tracing::warn!(
                expected = %path,
                actual = %record.path,
                "record path mismatch"
            );
            return Err(StoreError::PathMismatch {
                expected: path.to_owned(),
                actual: record.path,
            });
        }
        Ok(record)
    }

    pub(crate) fn into_document(self) -> Document {
        Document {
            path: self.path,
            values: self.values,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}
