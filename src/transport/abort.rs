//! Abort coordinator.
//!
//! A cooperative shutdown sends an HTTP abort to the remote endpoint and
//! waits, bounded by a timeout, for the remote to acknowledge by closing the
//! socket. The socket close path calls [`AbortCoordinator::try_complete`];
//! whichever of acknowledgement, timeout or disposal comes first decides the
//! [`AbortOutcome`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, warn};

use crate::connection::{Connection, TraceLevel};
use crate::http::HttpClient;

// ============================================================================
// AbortOutcome
// ============================================================================

/// How an abort request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The remote closed the socket in response.
    Acknowledged,
    /// No acknowledgement within the timeout.
    TimedOut,
    /// The transport was disposed, or never started, so there was nothing to
    /// wait for.
    Moot,
}

// ============================================================================
// AbortCoordinator
// ============================================================================

/// One-shot latch pairing an abort request with its acknowledgement.
#[derive(Debug, Default)]
pub(crate) struct AbortCoordinator {
    /// An abort has been requested.
    requested: AtomicBool,
    /// The acknowledgement has been claimed.
    completed: AtomicBool,
    /// Released once acknowledged.
    ack: CancellationToken,
    /// Released on dispose.
    disposed: CancellationToken,
}

impl AbortCoordinator {
    /// Creates an idle coordinator.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once an abort has been requested.
    #[inline]
    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Marks an abort as requested ahead of [`AbortCoordinator::request`].
    #[inline]
    pub(crate) fn mark_requested(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Sends the HTTP abort and waits for acknowledgement, timeout or
    /// disposal.
    ///
    /// Failures of the HTTP request itself go to the connection's error sink
    /// unless they are cancellations; they do not end the wait early.
    pub(crate) async fn request(
        &self,
        http: Arc<dyn HttpClient>,
        connection: Arc<dyn Connection>,
        transport: &'static str,
        connection_data: String,
        timeout: Duration,
    ) -> AbortOutcome {
        if self.disposed.is_cancelled() {
            return AbortOutcome::Moot;
        }

        self.mark_requested();
        connection.trace(TraceLevel::Events, "Abort requested");

        let disposed = self.disposed.clone();
        tokio::spawn(
            async move {
                let request = http.abort(connection.as_ref(), transport, &connection_data);
                tokio::select! {
                    result = request => {
                        if let Err(e) = result {
                            if e.is_request_aborted() {
                                debug!(error = %e, "Abort request cancelled");
                            } else {
                                warn!(error = %e, "Abort request failed");
                                connection.on_error(&e);
                            }
                        }
                    }
                    () = disposed.cancelled() => {
                        debug!("Abort request dropped on dispose");
                    }
                }
            }
            .in_current_span(),
        );

        tokio::select! {
            biased;

            () = self.ack.cancelled() => AbortOutcome::Acknowledged,
            () = self.disposed.cancelled() => AbortOutcome::Moot,
            () = tokio::time::sleep(timeout) => AbortOutcome::TimedOut,
        }
    }

    /// Claims the acknowledgement for a requested abort.
    ///
    /// Returns `true` exactly once, and only after [`AbortCoordinator::request`]
    /// was called.
    pub(crate) fn try_complete(&self) -> bool {
        if !self.is_requested() {
            return false;
        }

        let claimed = self
            .completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if claimed {
            self.ack.cancel();
        }
        claimed
    }

    /// Releases any waiter as [`AbortOutcome::Moot`].
    pub(crate) fn dispose(&self) {
        self.disposed.cancel();
    }
}

// ============================================================================
// Tests
// ============================================================================
