//! The document store façade.
//!
//! [`Store`] owns the encryption barrier for as long as it is open and
//! exposes path-addressed documents on top of it. Writers and readers are
//! serialized by one store-wide `RwLock`: `create`, `set`, `delete`,
//! `delete_all` and `increment` hold it exclusively for their whole
//! duration, so check-then-write sequences are atomic with respect to other
//! writers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dstore_storage::StorageBackend;
use tokio::sync::RwLock;
use tracing::{Span, debug, info, warn};

use crate::barrier::Barrier;
use crate::clock::{Clock, SystemClock};
use crate::config::{self, StoreConfig};
use crate::context::Context;
use crate::crypto::EncryptionKey;
use crate::document::{Collection, Document, DocumentsOptions, SetOptions, Values};
use crate::error::StoreError;
use crate::increment::{self, IncrementCursor, Rebatch};
use crate::iterator::DocumentIterator;
use crate::path;
use crate::record::Record;

/// Construction-time collaborators of a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Source of `created_at` / `updated_at`.
    pub clock: Arc<dyn Clock>,
    /// Parent span for every event the store emits.
    pub span: Span,
    /// Engine selection and iterator tuning.
    pub config: StoreConfig,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            span: tracing::info_span!("dstore"),
            config: StoreConfig::default(),
        }
    }
}

impl StoreOptions {
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }
}

/// State shared by a store handle and the iterators it creates.
#[derive(Debug)]
pub(crate) struct Inner {
    pub(crate) state: RwLock<Option<OpenStore>>,
    pub(crate) config: StoreConfig,
    clock: Arc<dyn Clock>,
    span: Span,
    generations: AtomicU64,
}

/// Everything that only exists while the store is open.
#[derive(Debug)]
pub(crate) struct OpenStore {
    pub(crate) barrier: Barrier,
    /// Bumped on every open; iterators compare it to detect close/re-open.
    pub(crate) generation: u64,
    increments: HashMap<String, IncrementCursor>,
}

/// An encrypted, path-addressed document store.
///
/// Cloning a `Store` yields another handle to the same store.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

fn open_state(state: &Option<OpenStore>) -> Result<&OpenStore, StoreError> {
    state.as_ref().ok_or(StoreError::NotOpen)
}

/// Normalize a path that is about to be written or removed.
fn writable_path(raw: &str) -> Result<String, StoreError> {
    let normalized = path::normalize(raw);
    if path::is_root(&normalized) {
        return Err(StoreError::InvalidPath {
            path: normalized,
            reason: "the root is not a document location".to_owned(),
        });
    }
    Ok(normalized)
}

/// Ensure a raw key prefix is anchored at the root.
fn anchored(prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_owned()
    } else {
        format!("/{prefix}")
    }
}

/// The key range listed by `document_iterator`.
fn listing_range(parent: &str, prefix: &str) -> String {
    let parent = path::normalize(parent);
    if path::is_root(&parent) {
        anchored(prefix)
    } else {
        format!("{parent}/{}", prefix.trim_start_matches('/'))
    }
}

impl Store {
    /// Create a closed store.
    #[must_use]
    pub fn new(options: StoreOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(None),
                config: options.config,
                clock: options.clock,
                span: options.span,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Open the configured engine at `path` and unlock it with `key`.
    ///
    /// For PostgreSQL, `path` is the connection URL.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyOpen`] if the store is open.
    /// - [`StoreError::Config`] if the configured engine was not compiled in.
    /// - [`StoreError::Storage`] if the engine fails to open.
    pub async fn open_at_path(
        &self,
        ctx: &Context,
        path: &str,
        key: EncryptionKey,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        let mut state = self.inner.state.write().await;
        if state.is_some() {
            return Err(StoreError::AlreadyOpen);
        }
        let backend = config::open_backend(self.inner.config.backend, path).await?;
        self.install(&mut state, backend, key);
        Ok(())
    }

    /// Open the store over an already-constructed engine.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyOpen`] if the store is open.
    pub async fn open_with_backend(
        &self,
        ctx: &Context,
        backend: Arc<dyn StorageBackend>,
        key: EncryptionKey,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        let mut state = self.inner.state.write().await;
        if state.is_some() {
            return Err(StoreError::AlreadyOpen);
        }
        self.install(&mut state, backend, key);
        Ok(())
    }

    fn install(
        &self,
        state: &mut Option<OpenStore>,
        backend: Arc<dyn StorageBackend>,
        key: EncryptionKey,
    ) {
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        *state = Some(OpenStore {
            barrier: Barrier::new(backend, key),
            generation,
            increments: HashMap::new(),
        });
        info!(parent: &self.inner.span, generation, "store opened");
    }

    /// Whether the store is currently open.
    pub async fn is_open(&self) -> bool {
        self.inner.state.read().await.is_some()
    }

    /// Close the store, dropping the engine handle and zeroizing the key.
    ///
    /// Outstanding iterators are invalidated. Unused identifiers of the
    /// current increment batches are abandoned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] if the store is not open.
    pub async fn close(&self) -> Result<(), StoreError> {
        let mut state = self.inner.state.write().await;
        let open = state.take().ok_or(StoreError::NotOpen)?;
        info!(parent: &self.inner.span, generation = open.generation, "store closed");
        Ok(())
    }

    async fn read_record(&self, barrier: &Barrier, path: &str) -> Result<Option<Record>, StoreError> {
        let bytes = barrier.get(path).await.map_err(|e| {
            let err = StoreError::from_barrier(path, e);
            if matches!(err, StoreError::Decryption { .. }) {
                warn!(parent: &self.inner.span, path = %path, "record failed authentication");
            }
            err
        })?;
        bytes.map(|b| Record::from_bytes(path, &b)).transpose()
    }

    async fn write_record(barrier: &Barrier, record: &Record) -> Result<(), StoreError> {
        let bytes = record.to_bytes()?;
        barrier
            .put(&record.path, &bytes)
            .await
            .map_err(|e| StoreError::from_barrier(&record.path, e))
    }

    /// Whether a document exists at `path`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotOpen`] if the store is not open.
    /// - [`StoreError::Storage`] if the engine fails.
    pub async fn exists(&self, ctx: &Context, path: &str) -> Result<bool, StoreError> {
        ctx.check()?;
        let path = path::normalize(path);
        let state = self.inner.state.read().await;
        let open = open_state(&state)?;
        open.barrier
            .exists(&path)
            .await
            .map_err(|e| StoreError::from_barrier(&path, e))
    }

    /// Create a new document.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidPath`] for the root.
    /// - [`StoreError::PathExists`] if a document is already stored at `path`.
    /// - [`StoreError::NotOpen`], [`StoreError::Encryption`],
    ///   [`StoreError::Storage`] as for any write.
    pub async fn create(&self, ctx: &Context, path: &str, values: Values) -> Result<(), StoreError> {
        ctx.check()?;
        let path = writable_path(path)?;
        let state = self.inner.state.write().await;
        let open = open_state(&state)?;

        let exists = open
            .barrier
            .exists(&path)
            .await
            .map_err(|e| StoreError::from_barrier(&path, e))?;
        if exists {
            return Err(StoreError::PathExists { path });
        }

        let now = self.inner.clock.now();
        let record = Record {
            path,
            values,
            created_at: now,
            updated_at: now,
        };
        Self::write_record(&open.barrier, &record).await?;
        debug!(parent: &self.inner.span, path = %record.path, "document created");
        Ok(())
    }

    /// Write a document, creating it if needed.
    ///
    /// With [`SetOptions::merge_all`], fields are merged into the stored map
    /// (new values win); otherwise the map is replaced. `created_at` is kept
    /// from the stored record.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidPath`] for the root.
    /// - [`StoreError::Decryption`] / [`StoreError::PathMismatch`] if the
    ///   stored record cannot be read back.
    /// - [`StoreError::NotOpen`], [`StoreError::Storage`] as for any write.
    pub async fn set(
        &self,
        ctx: &Context,
        path: &str,
        values: Values,
        options: SetOptions,
    ) -> Result<(), StoreError> {
        ctx.check()?;
        let path = writable_path(path)?;
        let state = self.inner.state.write().await;
        let open = open_state(&state)?;

        let now = self.inner.clock.now();
        let record = match self.read_record(&open.barrier, &path).await? {
            None => Record {
                path,
                values,
                created_at: now,
                updated_at: now,
            },
            Some(mut current) => {
                if options.merge_all {
                    current.values.extend(values);
                } else {
                    current.values = values;
                }
                current.updated_at = now.max(current.created_at);
                current
            }
        };
        Self::write_record(&open.barrier, &record).await?;
        debug!(
            parent: &self.inner.span,
            path = %record.path,
            merge = options.merge_all,
            "document written"
        );
        Ok(())
    }

    /// Read a document.
    ///
    /// Returns `Ok(None)` if nothing is stored at `path`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotOpen`] if the store is not open.
    /// - [`StoreError::Decryption`] if the record fails authentication.
    /// - [`StoreError::PathMismatch`] if the record belongs to another path.
    pub async fn get(&self, ctx: &Context, path: &str) -> Result<Option<Document>, StoreError> {
        ctx.check()?;
        let path = path::normalize(path);
        let state = self.inner.state.read().await;
        let open = open_state(&state)?;
        let record = self.read_record(&open.barrier, &path).await?;
        Ok(record.map(Record::into_document))
    }

    /// Read several documents in the given order, omitting missing ones.
    ///
    /// # Errors
    ///
    /// The first failing read is returned; see [`get`](Store::get).
    pub async fn get_all<I>(&self, ctx: &Context, paths: I) -> Result<Vec<Document>, StoreError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        ctx.check()?;
        let state = self.inner.state.read().await;
        let open = open_state(&state)?;

        let mut documents = Vec::new();
        for raw in paths {
            ctx.check()?;
            let path = path::normalize(raw.as_ref());
            if let Some(record) = self.read_record(&open.barrier, &path).await? {
                documents.push(record.into_document());
            }
        }
        Ok(documents)
    }

    /// Delete a document, returning whether it existed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidPath`] for the root.
    /// - [`StoreError::NotOpen`] if the store is not open.
    /// - [`StoreError::Storage`] if the engine fails.
    pub async fn delete(&self, ctx: &Context, path: &str) -> Result<bool, StoreError> {
        ctx.check()?;
        let path = writable_path(path)?;
        let state = self.inner.state.write().await;
        let open = open_state(&state)?;
        let removed = open
            .barrier
            .delete(&path)
            .await
            .map_err(|e| StoreError::from_barrier(&path, e))?;
        debug!(parent: &self.inner.span, path = %path, removed, "document deleted");
        Ok(removed)
    }

    /// Delete several documents in order.
    ///
    /// The first failure aborts the remaining deletions and is returned;
    /// documents deleted before it stay deleted.
    ///
    /// # Errors
    ///
    /// See [`delete`](Store::delete).
    pub async fn delete_all<I>(&self, ctx: &Context, paths: I) -> Result<(), StoreError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        ctx.check()?;
        let state = self.inner.state.write().await;
        let open = open_state(&state)?;

        let mut removed = 0_usize;
        for raw in paths {
            ctx.check()?;
            let path = writable_path(raw.as_ref())?;
            if open
                .barrier
                .delete(&path)
                .await
                .map_err(|e| StoreError::from_barrier(&path, e))?
            {
                removed += 1;
            }
        }
        debug!(parent: &self.inner.span, removed, "documents deleted");
        Ok(())
    }

    /// The lexicographically greatest document whose path starts with
    /// `prefix`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotOpen`] if the store is not open.
    /// - [`StoreError::Decryption`] / [`StoreError::PathMismatch`] if the
    ///   record cannot be read.
    pub async fn last(&self, ctx: &Context, prefix: &str) -> Result<Option<Document>, StoreError> {
        ctx.check()?;
        let prefix = anchored(prefix);
        let state = self.inner.state.read().await;
        let open = open_state(&state)?;
        let Some((key, plaintext)) = open
            .barrier
            .last(&prefix)
            .await
            .map_err(|e| StoreError::from_barrier(&prefix, e))?
        else {
            return Ok(None);
        };
        Ok(Some(Record::from_bytes(&key, &plaintext)?.into_document()))
    }

    /// The distinct top-level collections, in first-seen key order.
    ///
    /// Scans every stored key.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NestedCollections`] unless `parent` is the root.
    /// - [`StoreError::NotOpen`] if the store is not open.
    /// - [`StoreError::Storage`] if the engine fails.
    pub async fn collections(&self, ctx: &Context, parent: &str) -> Result<Vec<Collection>, StoreError> {
        ctx.check()?;
        if !path::is_root(parent) {
            return Err(StoreError::NestedCollections {
                parent: parent.to_owned(),
            });
        }
        let state = self.inner.state.read().await;
        let open = open_state(&state)?;

        let page_size = self.inner.config.page_size.max(1);
        let mut seen = HashSet::new();
        let mut collections = Vec::new();
        let mut after: Option<String> = None;
        loop {
            ctx.check()?;
            let keys = open
                .barrier
                .scan_keys(path::ROOT, after.as_deref(), page_size)
                .await
                .map_err(|e| StoreError::from_barrier(path::ROOT, e))?;
            for key in &keys {
                if let Some(name) = path::first(key) {
                    if seen.insert(name.to_owned()) {
                        collections.push(Collection {
                            path: path::join([name]),
                        });
                    }
                }
            }
            if keys.is_empty() || keys.len() < page_size {
                break;
            }
            after = keys.into_iter().next_back();
        }
        Ok(collections)
    }

    /// A lazy iterator over the documents below `parent`.
    ///
    /// Below a non-root parent the listed range is `parent/prefix`; at the
    /// root it is `prefix` itself. Release the iterator when done.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotOpen`] if the store is not open.
    pub async fn document_iterator(
        &self,
        ctx: &Context,
        parent: &str,
        options: DocumentsOptions,
    ) -> Result<DocumentIterator, StoreError> {
        ctx.check()?;
        let state = self.inner.state.read().await;
        let open = open_state(&state)?;
        let range = listing_range(parent, &options.prefix);
        debug!(parent: &self.inner.span, range = %range, "document iterator created");
        Ok(DocumentIterator::new(
            Arc::clone(&self.inner),
            open.generation,
            range,
            &options,
        ))
    }

    /// Every document below `parent`, drained from
    /// [`document_iterator`](Store::document_iterator).
    ///
    /// # Errors
    ///
    /// See [`DocumentIterator::next`].
    pub async fn documents(
        &self,
        ctx: &Context,
        parent: &str,
        options: DocumentsOptions,
    ) -> Result<Vec<Document>, StoreError> {
        self.document_iterator(ctx, parent, options)
            .await?
            .collect(ctx)
            .await
    }

    /// Number of documents below `parent` matching `prefix`.
    ///
    /// # Errors
    ///
    /// See [`DocumentIterator::next`].
    pub async fn count(&self, ctx: &Context, parent: &str, prefix: &str) -> Result<usize, StoreError> {
        let options = DocumentsOptions::default().prefix(prefix).no_data(true);
        let mut iter = self.document_iterator(ctx, parent, options).await?;
        let mut count = 0;
        while iter.next(ctx).await?.is_some() {
            count += 1;
        }
        iter.release();
        Ok(count)
    }

    /// Next identifier of the counter stored at `path`.
    ///
    /// Identifiers are strictly increasing across restarts and formatted as
    /// 15-digit zero-padded decimals. Gaps are possible after a re-open.
    ///
    /// # Errors
    ///
    /// - [`StoreError::IncrementExhausted`] once the identifier space is
    ///   used up. Callers should treat this as fatal.
    /// - [`StoreError::InvalidPath`] for the root.
    /// - [`StoreError::Codec`] if `path` holds a non-counter document.
    /// - [`StoreError::NotOpen`], [`StoreError::Storage`] as for any write.
    pub async fn increment(&self, ctx: &Context, path: &str) -> Result<String, StoreError> {
        ctx.check()?;
        let path = writable_path(path)?;
        let mut state = self.inner.state.write().await;
        let open = state.as_mut().ok_or(StoreError::NotOpen)?;

        let mut cursor = match open.increments.get(&path).copied() {
            Some(cursor) if !cursor.is_exhausted() => cursor,
            _ => self.rebatch(&open.barrier, &path).await?,
        };
        let exhausted = || StoreError::IncrementExhausted { path: path.clone() };
        let id = cursor.advance().ok_or_else(exhausted)?;
        open.increments.insert(path.clone(), cursor);
        increment::format_id(id).ok_or_else(exhausted)
    }

    /// Reserve the next batch for the counter at `path`, persisting its end
    /// before any identifier of it is handed out.
    async fn rebatch(&self, barrier: &Barrier, path: &str) -> Result<IncrementCursor, StoreError> {
        let existing = self.read_record(barrier, path).await?;
        let persisted = match &existing {
            None => 0,
            Some(record) => {
                increment::counter_value(&record.values).ok_or_else(|| StoreError::Codec {
                    path: path.to_owned(),
                    reason: "missing or non-integer counter field".to_owned(),
                })?
            }
        };
        let Rebatch { cursor, persist } =
            IncrementCursor::rebatch(persisted).ok_or_else(|| StoreError::IncrementExhausted {
                path: path.to_owned(),
            })?;

        let now = self.inner.clock.now();
        let record = Record {
            path: path.to_owned(),
            values: increment::counter_values(persist),
            created_at: existing.map_or(now, |r| r.created_at),
            updated_at: now,
        };
        Self::write_record(barrier, &record).await?;
        debug!(parent: &self.inner.span, path = %path, next = persist, "increment batch reserved");
        Ok(cursor)
    }
}
