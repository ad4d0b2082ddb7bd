//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing attempt numbers with other counters.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

// ============================================================================
// AttemptId
// ============================================================================

/// Process-wide counter for attempt IDs.
static NEXT_ATTEMPT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one connect attempt and the socket instance it owns.
///
/// Every (re)connect attempt gets a fresh ID. Socket callbacks carry the ID
/// of the attempt they were registered for, so late events from a replaced
/// socket can be recognised and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    /// Allocates the next attempt ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_ATTEMPT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
