//! Lifecycle states of a transport instance.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// LifecycleState
// ============================================================================

/// Where a transport instance is in its connection lineage.
///
/// Starts at [`Idle`](Self::Idle); [`Disposed`](Self::Disposed) is terminal
/// and irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// Constructed, `start` not called yet.
    #[default]
    Idle,
    /// First connect attempt in flight.
    Connecting,
    /// Socket open.
    Open,
    /// Socket dropped unexpectedly; reconnect loop running.
    Reconnecting,
    /// Cooperative shutdown requested, waiting for the remote.
    Aborting,
    /// Torn down.
    Disposed,
}

impl LifecycleState {
    /// Returns `true` for [`Disposed`](Self::Disposed).
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Returns `true` if `send` is allowed.
    #[inline]
    #[must_use]
    pub const fn can_send(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Reconnecting => "Reconnecting",
            Self::Aborting => "Aborting",
            Self::Disposed => "Disposed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Tests
// ============================================================================
