//! Error types for the WebSocket transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use ws_transport::{Error, Result};
//!
//! fn example(transport: &WebSocketTransport) -> Result<()> {
//!     transport.send("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Connection | [`Error::ConnectFailure`], [`Error::ConnectionClosed`], [`Error::ConnectionLost`], [`Error::InvalidFrame`], [`Error::Proxy`] |
//! | Lifecycle | [`Error::InvalidState`], [`Error::Disposed`], [`Error::AlreadyCompleted`] |
//! | Shutdown | [`Error::Cancelled`], [`Error::RequestCancelled`], [`Error::AbortTimeout`] |
//! | Collaborators | [`Error::Http`], [`Error::Aggregate`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::transport::LifecycleState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the transport builder is missing a collaborator or
    /// carries an unusable setting.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// The connect URL could not be built.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// The socket failed to open.
    #[error("Connect failed: {message}")]
    ConnectFailure {
        /// Description of the connect failure.
        message: String,
    },

    /// The socket closed before or during an operation.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The attempt was abandoned through `lost_connection`.
    #[error("Connection lost")]
    ConnectionLost,

    /// An inbound frame could not be decoded.
    #[error("Invalid frame: {message}")]
    InvalidFrame {
        /// Description of the decode failure.
        message: String,
    },

    /// Proxy negotiation failed.
    #[error("Proxy error: {message}")]
    Proxy {
        /// Description of the proxy failure.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation not allowed in the current lifecycle state.
    ///
    /// Returned by `send` when the socket is not open.
    #[error("Invalid state: {message}")]
    InvalidState {
        /// What was attempted and why it was refused.
        message: String,
    },

    /// The transport has been disposed.
    #[error("Transport disposed")]
    Disposed,

    /// A completion was fulfilled twice.
    #[error("Completion already fulfilled")]
    AlreadyCompleted,

    // ========================================================================
    // Shutdown Errors
    // ========================================================================
    /// The operation was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// A network request was cancelled before it completed.
    #[error("Request cancelled: {message}")]
    RequestCancelled {
        /// Description of the cancelled request.
        message: String,
    },

    /// The remote did not acknowledge an abort in time.
    #[error("Abort not acknowledged after {timeout_ms}ms")]
    AbortTimeout {
        /// Milliseconds waited before giving up.
        timeout_ms: u64,
    },

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// HTTP side-channel failure (negotiate, abort).
    #[error("HTTP error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http {
        /// Response status, when one was received.
        status: Option<u16>,
        /// Description of the failure.
        message: String,
    },

    /// Several failures raised together.
    ///
    /// Consumers normally see [`Error::root_cause`] instead.
    #[error("{} errors, first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Aggregate(Vec<Error>),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a connect failure.
    #[inline]
    pub fn connect_failure(message: impl Into<String>) -> Self {
        Self::ConnectFailure {
            message: message.into(),
        }
    }

    /// Creates an invalid frame error.
    #[inline]
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame {
            message: message.into(),
        }
    }

    /// Creates a proxy error.
    #[inline]
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy {
            message: message.into(),
        }
    }

    /// Creates an invalid state error for an operation that requires `Open`.
    #[inline]
    pub fn invalid_state(state: LifecycleState) -> Self {
        Self::InvalidState {
            message: format!("transport is {state}, not Open"),
        }
    }

    /// Creates an invalid state error for a socket that is not open.
    #[inline]
    pub fn socket_not_open() -> Self {
        Self::InvalidState {
            message: "socket is not open".into(),
        }
    }

    /// Creates an invalid state error for a second `start`.
    #[inline]
    pub fn already_started() -> Self {
        Self::InvalidState {
            message: "transport already started".into(),
        }
    }

    /// Creates a request cancelled error.
    #[inline]
    pub fn request_cancelled(message: impl Into<String>) -> Self {
        Self::RequestCancelled {
            message: message.into(),
        }
    }

    /// Creates an abort timeout error.
    #[inline]
    pub fn abort_timeout(timeout_ms: u64) -> Self {
        Self::AbortTimeout { timeout_ms }
    }

    /// Creates an HTTP error.
    #[inline]
    pub fn http(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Wraps several errors, collapsing the trivial cases.
    pub fn aggregate(mut errors: Vec<Error>) -> Self {
        match errors.len() {
            0 => Self::connect_failure("no error recorded"),
            1 => errors.remove(0),
            _ => Self::Aggregate(errors),
        }
    }
}

// ============================================================================
// Unwrapping
// ============================================================================

impl Error {
    /// Returns the single underlying cause.
    ///
    /// Aggregates are replaced by their first constituent, recursively.
    #[must_use]
    pub fn root_cause(self) -> Self {
        match self {
            Self::Aggregate(mut errors) if !errors.is_empty() => errors.remove(0).root_cause(),
            other => other,
        }
    }

    /// Borrowing variant of [`Error::root_cause`].
    #[must_use]
    pub fn root_cause_ref(&self) -> &Self {
        match self {
            Self::Aggregate(errors) => errors.first().map_or(self, Self::root_cause_ref),
            other => other,
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the root cause is a cancellation signal.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root_cause_ref(), Self::Cancelled)
    }

    /// Returns `true` if this failure means a shutdown is already in progress.
    ///
    /// Cancellation, disposal and cancelled network requests all classify as
    /// aborted requests. These are never reported to the error sink and never
    /// count as reconnect-worthy.
    #[inline]
    #[must_use]
    pub fn is_request_aborted(&self) -> bool {
        matches!(
            self.root_cause_ref(),
            Self::Cancelled | Self::Disposed | Self::RequestCancelled { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.root_cause_ref(),
            Self::ConnectFailure { .. }
                | Self::ConnectionClosed
                | Self::ConnectionLost
                | Self::Proxy { .. }
                | Self::Io(_)
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the attempt was abandoned and should be retried
    /// at once.
    #[inline]
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.root_cause_ref(), Self::ConnectionLost)
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause_ref(), Self::AbortTimeout { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
