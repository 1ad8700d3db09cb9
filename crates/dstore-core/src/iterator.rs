//! Lazy listing over a key range.
//!
//! A [`DocumentIterator`] pages through the engine with bounded `scan`
//! calls instead of holding an engine cursor, and decrypts one entry per
//! step. It takes the store's shared lock per step, so it never blocks
//! `close`; instead it notices the store went away and fails with
//! [`StoreError::IteratorInvalidated`].

use std::collections::VecDeque;
use std::sync::Arc;

use dstore_storage::Entry;

use crate::barrier::Barrier;
use crate::context::Context;
use crate::document::{Document, DocumentsOptions};
use crate::error::StoreError;
use crate::record::Record;
use crate::store::Inner;

/// A lazy cursor over the documents of one listing.
///
/// Every step returns owned documents. Call [`release`](Self::release) when
/// done; dropping the iterator has the same effect.
#[derive(Debug)]
pub struct DocumentIterator {
    inner: Arc<Inner>,
    generation: u64,
    range: String,
    skip: usize,
    limit: usize,
    no_data: bool,
    page_size: usize,
    /// Last key fetched from the engine; the next page starts after it.
    after: Option<String>,
    buffer: VecDeque<Entry>,
    exhausted: bool,
    yielded: usize,
    released: bool,
}

impl DocumentIterator {
    pub(crate) fn new(
        inner: Arc<Inner>,
        generation: u64,
        range: String,
        options: &DocumentsOptions,
    ) -> Self {
        let page_size = inner.config.page_size.max(1);
        Self {
            inner,
            generation,
            range,
            skip: options.index,
            limit: options.limit,
            no_data: options.no_data,
            page_size,
            after: None,
            buffer: VecDeque::new(),
            exhausted: false,
            yielded: 0,
            released: false,
        }
    }

    /// The key prefix this iterator lists.
    pub fn range(&self) -> &str {
        &self.range
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Advance to the next document.
    ///
    /// Returns `Ok(None)` at the end of the range or once `limit` documents
    /// were yielded. A failing entry is not skipped: calling `next` again
    /// retries it.
    ///
    /// # Errors
    ///
    /// - [`StoreError::IteratorReleased`] after [`release`](Self::release).
    /// - [`StoreError::IteratorInvalidated`] if the store was closed or
    ///   re-opened since the iterator was created.
    /// - [`StoreError::Decryption`] / [`StoreError::PathMismatch`] /
    ///   [`StoreError::Codec`] for a damaged record.
    /// - [`StoreError::Cancelled`] / [`StoreError::DeadlineExceeded`].
    pub async fn next(&mut self, ctx: &Context) -> Result<Option<Document>, StoreError> {
        if self.released {
            return Err(StoreError::IteratorReleased);
        }
        ctx.check()?;
        if self.limit != 0 && self.yielded >= self.limit {
            return Ok(None);
        }

        let inner = Arc::clone(&self.inner);
        let state = inner.state.read().await;
        let barrier = match state.as_ref() {
            Some(open) if open.generation == self.generation => &open.barrier,
            _ => return Err(StoreError::IteratorInvalidated),
        };

        loop {
            let Some(entry) = self.next_entry(barrier).await? else {
                return Ok(None);
            };
            if self.skip > 0 {
                self.skip -= 1;
                continue;
            }
            let document = if self.no_data {
                Document::new(&entry.key)
            } else {
                match decode(barrier, &entry) {
                    Ok(document) => document,
                    Err(err) => {
                        self.buffer.push_front(entry);
                        return Err(err);
                    }
                }
            };
            self.yielded += 1;
            return Ok(Some(document));
        }
    }

    async fn next_entry(&mut self, barrier: &Barrier) -> Result<Option<Entry>, StoreError> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill(barrier).await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn fill(&mut self, barrier: &Barrier) -> Result<(), StoreError> {
        let after = self.after.as_deref();
        let page = if self.no_data {
            barrier
                .scan_keys(&self.range, after, self.page_size)
                .await
                .map_err(|e| StoreError::from_barrier(&self.range, e))?
                .into_iter()
                .map(|key| Entry {
                    key,
                    value: Vec::new(),
                })
                .collect()
        } else {
            barrier
                .scan(&self.range, after, self.page_size)
                .await
                .map_err(|e| StoreError::from_barrier(&self.range, e))?
        };

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(last.key.clone());
        }
        self.buffer.extend(page);
        Ok(())
    }

    /// End the iteration. Further calls to [`next`](Self::next) fail.
    pub fn release(&mut self) {
        self.released = true;
        self.buffer.clear();
    }

    /// Drain the remaining documents, then release.
    ///
    /// # Errors
    ///
    /// The first error from [`next`](Self::next).
    pub async fn collect(mut self, ctx: &Context) -> Result<Vec<Document>, StoreError> {
        let mut documents = Vec::new();
        while let Some(document) = self.next(ctx).await? {
            documents.push(document);
        }
        self.release();
        Ok(documents)
    }
}

fn decode(barrier: &Barrier, entry: &Entry) -> Result<Document, StoreError> {
    let plaintext = barrier
        .open_entry(entry)
        .map_err(|e| StoreError::from_barrier(&entry.key, e))?;
    Ok(Record::from_bytes(&entry.key, &plaintext)?.into_document())
}
