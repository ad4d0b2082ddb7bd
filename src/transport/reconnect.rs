//! Reconnect policy.
//!
//! Fixed-delay retry loop run after an unexpected close. Each round
//! re-validates that reconnecting is still worthwhile before dialling again.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::{Connection, TraceLevel};
use crate::error::Error;

// ============================================================================
// Constants
// ============================================================================

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

// ============================================================================
// ReconnectOutcome
// ============================================================================

/// How a reconnect loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOutcome {
    /// An attempt opened.
    Reconnected,
    /// The connection went stale or refused to reconnect.
    Exhausted,
    /// The caller stopped the loop, e.g. a newer loop took over.
    Superseded,
    /// Shutdown observed.
    Cancelled,
}

// ============================================================================
// AttemptFailure
// ============================================================================

/// A failed connect attempt.
#[derive(Debug)]
pub(crate) struct AttemptFailure {
    pub(crate) error: Error,
    /// The error already reached the connection's error sink.
    pub(crate) reported: bool,
}

impl From<Error> for AttemptFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            reported: false,
        }
    }
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Fixed-delay reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReconnectPolicy {
    delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Creates a policy waiting `delay` between failed attempts.
    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Returns the delay between attempts.
    #[inline]
    pub(crate) fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs the loop until an attempt opens or the loop must stop.
    ///
    /// `should_continue` is consulted before every attempt, ahead of the
    /// connection's reconnecting gate, and lets the caller stop a superseded
    /// or aborting loop. `connect` performs one attempt. An attempt abandoned
    /// through `lost_connection` is retried without delay. Failures already
    /// reported by the attempt are not reported twice.
    pub(crate) async fn run<C, F>(
        &self,
        connection: &dyn Connection,
        instance: &CancellationToken,
        mut should_continue: impl FnMut() -> bool,
        mut connect: C,
    ) -> ReconnectOutcome
    where
        C: FnMut() -> F,
        F: Future<Output = std::result::Result<(), AttemptFailure>>,
    {
        let mut round: u32 = 0;

        loop {
            if instance.is_cancelled() {
                return ReconnectOutcome::Cancelled;
            }

            if !connection.is_recently_active() {
                debug!(round, "Connection stale, giving up reconnect");
                connection.trace(
                    TraceLevel::Events,
                    "Connection has been inactive longer than the reconnect window",
                );
                return ReconnectOutcome::Exhausted;
            }

            if !should_continue() {
                debug!(round, "Reconnect loop superseded");
                return ReconnectOutcome::Superseded;
            }

            if !connection.ensure_reconnecting() {
                debug!(round, state = %connection.state(), "Connection refused to reconnect");
                return ReconnectOutcome::Exhausted;
            }

            round += 1;
            connection.trace(TraceLevel::Events, "Reconnecting");

            match connect().await {
                Ok(()) => {
                    debug!(round, "Reconnected");
                    return ReconnectOutcome::Reconnected;
                }

                Err(failure) if failure.error.is_connection_lost() && !instance.is_cancelled() => {
                    debug!(round, "Reconnect attempt abandoned, retrying");
                    continue;
                }

                Err(failure) if failure.error.is_request_aborted() => {
                    debug!(round, error = %failure.error, "Reconnect cancelled");
                    return ReconnectOutcome::Cancelled;
                }

                Err(AttemptFailure { error, reported }) => {
                    warn!(round, error = %error, delay_ms = self.delay.as_millis() as u64, "Reconnect attempt failed");
                    if !reported {
                        connection.on_error(&error);
                    }
                }
            }

            tokio::select! {
                () = instance.cancelled() => return ReconnectOutcome::Cancelled,
                () = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
