// crates/elspeth-core/src/runtime/retry.rs
// ============================================================================
// Module: Elspeth Retry Policy
// Description: Retry classification and backoff for plugin failures.
// Purpose: Keep retryable failures inside the executor until attempts exhaust.
// Dependencies: crate::{contracts, pipeline}
// ============================================================================

//! ## Overview
//! The engine consumes retryable transform failures (rate limits, transient
//! network, server errors) through this policy; non-retryable categories fail
//! the row immediately. Backoff doubles per attempt up to a cap, honouring
//! any retry-after hint from the plugin.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use crate::contracts::TransformErrorReason;
use crate::pipeline::RetrySettings;

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Evaluated retry policy for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first.
    max_attempts: u32,
    /// Initial backoff in milliseconds.
    initial_backoff_ms: u64,
    /// Backoff cap in milliseconds.
    max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Builds a policy from settings.
    #[must_use]
    pub const fn from_settings(settings: RetrySettings) -> Self {
        Self {
            max_attempts: if settings.max_attempts == 0 { 1 } else { settings.max_attempts },
            initial_backoff_ms: settings.initial_backoff_ms,
            max_backoff_ms: settings.max_backoff_ms,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Returns the maximum attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true when `reason` may be retried after `attempt` attempts.
    #[must_use]
    pub const fn should_retry(&self, reason: &TransformErrorReason, attempt: u32) -> bool {
        reason.is_retryable() && attempt < self.max_attempts
    }

    /// Returns the backoff before the attempt following `attempt`.
    ///
    /// Doubles per completed attempt, capped, and never shorter than the
    /// plugin's retry-after hint.
    #[must_use]
    pub fn backoff_after(&self, reason: &TransformErrorReason, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        let scaled = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << doublings)
            .min(self.max_backoff_ms);
        let floor = reason.retry_after_ms.unwrap_or(0);
        Duration::from_millis(scaled.max(floor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(RetrySettings::default())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only panic-based assertions are permitted."
)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::contracts::TransformErrorCategory;
    use crate::contracts::TransformErrorReason;
    use crate::pipeline::RetrySettings;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_settings(RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        })
    }

    #[test]
    fn retryable_categories_retry_until_attempts_exhaust() {
        let reason = TransformErrorReason::new(TransformErrorCategory::RateLimited, "slow down");
        assert!(policy().should_retry(&reason, 1));
        assert!(policy().should_retry(&reason, 2));
        assert!(!policy().should_retry(&reason, 3));
    }

    #[test]
    fn fatal_categories_never_retry() {
        let reason = TransformErrorReason::fatal("broken");
        assert!(!policy().should_retry(&reason, 1));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let reason = TransformErrorReason::new(TransformErrorCategory::ServerError, "5xx");
        assert_eq!(policy().backoff_after(&reason, 1), Duration::from_millis(100));
        assert_eq!(policy().backoff_after(&reason, 2), Duration::from_millis(200));
        assert_eq!(policy().backoff_after(&reason, 12), Duration::from_millis(1_000));
    }

    #[test]
    fn retry_after_hint_raises_the_floor() {
        let mut reason = TransformErrorReason::new(TransformErrorCategory::RateLimited, "429");
        reason.retry_after_ms = Some(750);
        assert_eq!(policy().backoff_after(&reason, 1), Duration::from_millis(750));
    }
}
