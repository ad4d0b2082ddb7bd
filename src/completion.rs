//! Single-fulfillment completion bridge.
//!
//! Socket events arrive as callbacks from arbitrary tasks. A
//! [`CompletionSource`] turns the first definitive outcome into a value the
//! owner awaits through the paired [`Completion`].
//!
//! # Outcomes
//!
//! | Source call | Awaited result |
//! |-------------|----------------|
//! | `succeed(v)` | `Ok(v)` |
//! | `fail(e)` | `Err(e.root_cause())` |
//! | `cancel()` | `Err(Error::Cancelled)` |
//! | source dropped | `Err(Error::Cancelled)` |
//!
//! Exactly one of the three fulfilment calls may succeed. Later calls return
//! [`Error::AlreadyCompleted`] and leave the first outcome untouched.
//!
//! # Example
//!
//! ```
//! use ws_transport::completion::CompletionSource;
//!
//! # async fn example() -> ws_transport::Result<()> {
//! let (source, completion) = CompletionSource::<u32>::new();
//! source.succeed(7)?;
//! assert!(source.cancel().is_err());
//! assert_eq!(completion.await?, 7);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

// ============================================================================
// CompletionSource
// ============================================================================

/// Fulfilment side of a completion bridge.
///
/// Cheap to clone; all clones share the same single slot.
pub struct CompletionSource<T> {
    /// Taken by the first fulfilment.
    sender: Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>,
}

impl<T> Clone for CompletionSource<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> fmt::Debug for CompletionSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSource")
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl<T> CompletionSource<T> {
    /// Creates a bridge and its linked completion.
    #[must_use]
    pub fn new() -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        let source = Self {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (source, Completion::pending(rx))
    }

    /// Fulfils with a success value.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyCompleted`] if an outcome was already set.
    pub fn succeed(&self, value: T) -> Result<()> {
        self.complete(Ok(value))
    }

    /// Fulfils with a failure.
    ///
    /// Aggregates are unwrapped so the consumer sees one concrete cause.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyCompleted`] if an outcome was already set.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.complete(Err(error.root_cause()))
    }

    /// Fulfils with cancellation.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyCompleted`] if an outcome was already set.
    pub fn cancel(&self) -> Result<()> {
        self.complete(Err(Error::Cancelled))
    }

    /// Returns `true` once any outcome has been set.
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }

    fn complete(&self, outcome: Result<T>) -> Result<()> {
        let sender = self.sender.lock().take().ok_or(Error::AlreadyCompleted)?;
        // Receiver may be gone; the slot is still consumed.
        let _ = sender.send(outcome);
        Ok(())
    }
}

// ============================================================================
// Completion
// ============================================================================

/// Awaitable side of a completion bridge.
///
/// Resolves to the outcome set on the paired [`CompletionSource`].
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    inner: Inner<T>,
}

enum Inner<T> {
    /// Outcome known at construction time.
    Ready(Option<Result<T>>),
    /// Waiting on a source.
    Pending(oneshot::Receiver<Result<T>>),
}

// T is never pinned in place.
impl<T> Unpin for Completion<T> {}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.inner {
            Inner::Ready(_) => "ready",
            Inner::Pending(_) => "pending",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}

impl<T> Completion<T> {
    fn pending(rx: oneshot::Receiver<Result<T>>) -> Self {
        Self {
            inner: Inner::Pending(rx),
        }
    }

    /// Creates a completion from an already-known outcome.
    ///
    /// No source and no scheduling round-trip are involved.
    pub fn ready(result: Result<T>) -> Self {
        Self {
            inner: Inner::Ready(Some(result.map_err(Error::root_cause))),
        }
    }

    /// Creates an already-cancelled completion.
    pub fn cancelled() -> Self {
        Self::ready(Err(Error::Cancelled))
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Ready(slot) => Poll::Ready(slot.take().unwrap_or(Err(Error::AlreadyCompleted))),
            // A dropped source means nobody will ever fulfil it.
            Inner::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(Error::Cancelled))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
