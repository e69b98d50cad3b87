// crates/elspeth-core/src/contracts/time.rs
// ============================================================================
// Module: Elspeth Time Model
// Description: Canonical timestamp representation for ledger records.
// Purpose: Provide deterministic, replayable time values across Elspeth records.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Elspeth embeds explicit time values in every ledger record to keep replay
//! deterministic. The engine never reads wall-clock time directly; hosts
//! supply timestamps through the [`Clock`](crate::interfaces::Clock) seam on
//! runtime services.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used in Elspeth ledger records.
///
/// # Invariants
/// - Values are unix epoch milliseconds explicitly provided by callers; the
///   engine never reads wall-clock time.
/// - No validation is performed; monotonicity is a caller responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the non-negative duration in milliseconds since `earlier`.
    ///
    /// Clock regressions clamp to zero rather than producing negative
    /// durations in the ledger.
    #[must_use]
    pub const fn saturating_millis_since(self, earlier: Self) -> u64 {
        let delta = self.0.saturating_sub(earlier.0);
        if delta < 0 { 0 } else { delta as u64 }
    }

    /// Returns this timestamp advanced by `millis`.
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }
}
