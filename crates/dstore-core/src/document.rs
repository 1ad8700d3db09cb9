//! Documents, collections, and the options that shape listing and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path;

/// The open field map stored in a document.
pub type Values = serde_json::Map<String, Value>;

/// Field name used by [`data`] for single-value documents.
pub const DATA_FIELD: &str = "data";

/// Build a field map holding one value under [`DATA_FIELD`].
///
/// ```
/// # use dstore_core::document::data;
/// let values = data("value10");
/// assert_eq!(values["data"], "value10");
/// ```
pub fn data(value: impl Into<Value>) -> Values {
    let mut values = Values::new();
    values.insert(DATA_FIELD.to_owned(), value.into());
    values
}

/// A stored document.
///
/// Documents handed out by the store are owned copies; changing one has no
/// effect until it is written back with `set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Normalized path, unique within the store.
    pub path: String,
    /// Field map. Empty for documents listed with `no_data`.
    #[serde(default)]
    pub values: Values,
    /// Time of the first write. `None` for documents listed with `no_data`.
    pub created_at: Option<DateTime<Utc>>,
    /// Time of the latest write. `None` for documents listed with `no_data`.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A document with a normalized path and no fields or timestamps.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: path::normalize(path),
            values: Values::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Replace the field map.
    #[must_use]
    pub fn with_values(mut self, values: Values) -> Self {
        self.values = values;
        self
    }

    /// The collection (first path segment) this document belongs to.
    pub fn collection(&self) -> Option<&str> {
        path::first(&self.path)
    }

    /// The last path segment.
    pub fn name(&self) -> Option<&str> {
        path::last(&self.path)
    }

    /// Look up a single field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// The [`DATA_FIELD`] value, if present.
    pub fn data(&self) -> Option<&Value> {
        self.get(DATA_FIELD)
    }
}

/// A collection: the set of documents sharing a first path segment.
///
/// Collections are not stored; they exist while at least one document does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Collection {
    /// The collection path, e.g. `/keys`.
    pub path: String,
}

impl Collection {
    /// The collection name without the leading slash.
    pub fn name(&self) -> &str {
        path::first(&self.path).unwrap_or_default()
    }
}

/// Options for `Store::set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Merge the new fields into the existing map instead of replacing it.
    pub merge_all: bool,
}

impl SetOptions {
    /// Replace the stored field map (the default).
    #[must_use]
    pub fn replace() -> Self {
        Self { merge_all: false }
    }

    /// Merge field-by-field; untouched fields are preserved.
    #[must_use]
    pub fn merge_all() -> Self {
        Self { merge_all: true }
    }
}

/// Options for listing documents under a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentsOptions {
    /// Only paths whose remainder after the parent starts with this.
    pub prefix: String,
    /// Number of matches to skip before yielding.
    pub index: usize,
    /// Maximum number of documents to yield; `0` means unlimited.
    pub limit: usize,
    /// Yield paths only, without decrypting values.
    pub no_data: bool,
}

impl DocumentsOptions {
    /// Restrict to paths starting with `prefix` below the parent.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Skip the first `index` matches.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Yield at most `limit` documents.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Yield paths only.
    #[must_use]
    pub fn no_data(mut self, no_data: bool) -> Self {
        self.no_data = no_data;
        self
    }
}
