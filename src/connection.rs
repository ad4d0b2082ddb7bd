//! Higher-level connection collaborator.
//!
//! The transport never owns application-level state. It talks to the
//! connection manager through the [`Connection`] trait: URL and query data,
//! a tracing sink, an error sink, the message processor and the
//! compare-and-swap state primitive used to reconcile reconnects.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

// ============================================================================
// ConnectionState
// ============================================================================

/// Application-level state owned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// First connect in progress.
    Connecting,
    /// Logical session established.
    Connected,
    /// Session alive, socket being re-established.
    Reconnecting,
    /// Session ended.
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Reconnecting => "Reconnecting",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

// ============================================================================
// TraceLevel
// ============================================================================

/// Category of a trace line sent to the connection's tracing sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceLevel {
    /// Message payloads.
    Messages,
    /// Transport events (connect, close, abort).
    Events,
    /// State transitions.
    StateChanges,
}

// ============================================================================
// MessageOutcome
// ============================================================================

/// Result of handing one inbound payload to the message processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageOutcome {
    /// Keep going.
    #[default]
    Continue,
    /// The server asked the client to disconnect.
    Disconnect,
}

// ============================================================================
// Connection
// ============================================================================

/// The connection manager as seen by the transport.
///
/// Implementations must be callable from any task; the transport invokes
/// these methods from socket I/O tasks and timers without holding any of its
/// own locks.
pub trait Connection: Send + Sync {
    /// Base URL of the endpoint, ending with `/`.
    fn url(&self) -> &str;

    /// Token identifying the logical connection, from negotiation.
    fn connection_token(&self) -> Option<String> {
        None
    }

    /// Last message ID seen, used to resume after a reconnect.
    fn message_id(&self) -> Option<String> {
        None
    }

    /// Groups token, used to resume group membership after a reconnect.
    fn groups_token(&self) -> Option<String> {
        None
    }

    /// Custom query string appended to every transport URL.
    fn query_string(&self) -> Option<String> {
        None
    }

    /// Tracing sink.
    fn trace(&self, _level: TraceLevel, _message: &str) {}

    /// Error sink.
    fn on_error(&self, error: &Error);

    /// Message processor.
    ///
    /// # Errors
    ///
    /// Returned errors are reported back through [`Connection::on_error`].
    fn on_received(&self, payload: &str) -> Result<MessageOutcome>;

    /// Starts the connection's own disconnect path.
    fn disconnect(&self);

    /// Current application-level state.
    fn state(&self) -> ConnectionState;

    /// Atomically moves from `old` to `new`; returns `false` if the state was
    /// not `old`.
    fn change_state(&self, old: ConnectionState, new: ConnectionState) -> bool;

    /// Raised after the connection entered `Reconnecting`.
    fn on_reconnecting(&self) {}

    /// Raised after a silent reconnect brought the connection back.
    fn on_reconnected(&self) {}

    /// Records that traffic was observed.
    fn mark_last_message(&self) {}

    /// When traffic or a keep-alive was last observed.
    fn last_active_at(&self) -> Instant;

    /// How long the connection may go without activity and still reconnect.
    fn reconnect_window(&self) -> Duration;

    /// Gate for the reconnect loop.
    ///
    /// Flips `Connected` to `Reconnecting` (raising
    /// [`Connection::on_reconnecting`]) and succeeds only if the connection
    /// is `Reconnecting` afterwards. A connection that is already stopping
    /// refuses.
    fn ensure_reconnecting(&self) -> bool {
        if self.change_state(ConnectionState::Connected, ConnectionState::Reconnecting) {
            self.on_reconnecting();
        }
        self.state() == ConnectionState::Reconnecting
    }

    /// Returns `true` if the connection saw activity within its reconnect
    /// window.
    fn is_recently_active(&self) -> bool {
        self.last_active_at().elapsed() < self.reconnect_window()
    }
}

// ============================================================================
// Tests
// ============================================================================
