//! Batched, restart-safe monotonic identifiers.
//!
//! A counter lives at a caller-chosen path. Its persisted value is always the
//! start of the next unallocated batch, written *before* any identifier of
//! the current batch is handed out. A crash therefore skips at most one
//! batch and never reuses a value.
//!
//! Identifiers are 15-digit zero-padded decimals, so string order equals
//! numeric order.

use serde_json::Value;

use crate::document::Values;

/// Identifiers reserved by one persisted write.
pub const BATCH_SIZE: u64 = 1000;

/// Digits in a formatted identifier.
pub const ID_WIDTH: usize = 15;

/// Largest identifier that fits in [`ID_WIDTH`] digits.
pub const MAX_ID: u64 = 999_999_999_999_999;

/// Field holding the persisted counter inside the counter document.
pub(crate) const COUNTER_FIELD: &str = "counter";

/// In-memory cursor over one reserved batch.
///
/// A path with no cursor is cold; a cursor is hot while
/// `current < ceiling` and exhausted afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IncrementCursor {
    current: u64,
    ceiling: u64,
}

/// Result of a rebatch transition: the new cursor and the value to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rebatch {
    pub(crate) cursor: IncrementCursor,
    pub(crate) persist: u64,
}

impl IncrementCursor {
    /// Reserve the batch starting at `persisted`.
    ///
    /// Returns `None` if the next batch start would overflow.
    pub(crate) fn rebatch(persisted: u64) -> Option<Rebatch> {
        let persist = persisted.checked_add(BATCH_SIZE)?;
        Some(Rebatch {
            cursor: Self {
                current: persisted,
                ceiling: persist - 1,
            },
            persist,
        })
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.current >= self.ceiling
    }

    /// Advance and return the next identifier of the batch.
    ///
    /// Returns `None` when the batch is exhausted.
    pub(crate) fn advance(&mut self) -> Option<u64> {
        if self.is_exhausted() {
            return None;
        }
        self.current += 1;
        Some(self.current)
    }
}

/// Format an identifier as a fixed-width decimal.
///
/// Returns `None` when `id` does not fit in [`ID_WIDTH`] digits.
///
/// ```
/// # use dstore_core::increment::format_id;
/// assert_eq!(format_id(42).as_deref(), Some("000000000000042"));
/// ```
#[must_use]
pub fn format_id(id: u64) -> Option<String> {
    (id <= MAX_ID).then(|| format!("{id:0width$}", width = ID_WIDTH))
}

/// Read the persisted counter from a counter document's fields.
pub(crate) fn counter_value(values: &Values) -> Option<u64> {
    values.get(COUNTER_FIELD).and_then(Value::as_u64)
}

/// Fields of a counter document persisting `next`.
pub(crate) fn counter_values(next: u64) -> Values {
    let mut values = Values::new();
    values.insert(COUNTER_FIELD.to_owned(), Value::from(next));
    values
}
