//! Core library for `dstore`.
//!
//! Contains the encryption barrier, the streaming AEAD primitives, the
//! document store façade, listing iterators, and the batched increment
//! generator. This crate depends on `dstore-storage` for the storage backend
//! trait and knows nothing about the systems that keep their keys in it.

pub mod barrier;
pub mod clock;
pub mod config;
pub mod context;
pub mod crypto;
pub mod document;
pub mod error;
pub mod increment;
pub mod iterator;
pub mod path;
mod record;
pub mod store;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::{BackendKind, StoreConfig};
pub use context::{Canceller, Context};
pub use crypto::EncryptionKey;
pub use document::{Collection, Document, DocumentsOptions, SetOptions, Values, data};
pub use error::StoreError;
pub use iterator::DocumentIterator;
pub use store::{Store, StoreOptions};
