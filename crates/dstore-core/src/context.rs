//! Caller-supplied cancellation and deadlines.
//!
//! Every public store operation takes a [`Context`]. It is checked at
//! operation boundaries only: on entry, between paths of a batch, and before
//! each iterator step. A single encryption or engine call is never
//! interrupted midway.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::StoreError;

/// Cancellation signal plus optional deadline for store operations.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// The sending half of a cancellable [`Context`].
#[derive(Debug)]
pub struct Canceller {
    tx: watch::Sender<bool>,
}

impl Canceller {
    /// Signal cancellation to every context derived from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context together with the handle that cancels it.
    #[must_use]
    pub fn cancellable() -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        (Self::background().with_cancel(rx), Canceller { tx })
    }

    /// Observe an existing shutdown channel; `true` means cancelled.
    #[must_use]
    pub fn with_cancel(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    /// Fail operations that reach a boundary after `deadline`.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Shorthand for a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Whether the cancellation signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Return an error if the operation should stop here.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Cancelled`] once the signal has fired.
    /// - [`StoreError::DeadlineExceeded`] once the deadline has passed.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }
}
