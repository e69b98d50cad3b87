// crates/elspeth-core/src/runtime/services.rs
// ============================================================================
// Module: Elspeth Runtime Services
// Description: Explicit carrier for clock, rate limits, and fingerprint key.
// Purpose: Thread shared services through plugin contexts without singletons.
// Dependencies: crate::{contracts, interfaces}
// ============================================================================

//! ## Overview
//! Runtime services carry the process-wide collaborators every plugin may
//! need: the clock seam, named rate limiters with blocking FIFO-fair
//! acquisition, and the optional credential fingerprint key. The carrier is
//! threaded through [`PluginContext`](crate::interfaces::PluginContext);
//! there are no module-level singletons in the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::contracts::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: Lock Helper
// ============================================================================

/// Locks a mutex, recovering the inner value on poisoning.
///
/// Lint policy forbids panics while any lock below is held, so a poisoned
/// guard still protects a consistent value.
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// SECTION: Rate Limiter
// ============================================================================

/// Internal limiter bookkeeping.
struct LimiterState {
    /// Permits currently available.
    available: u32,
    /// Next ticket to hand out.
    next_ticket: u64,
    /// Ticket currently allowed to claim a permit.
    now_serving: u64,
}

/// Blocking concurrency limiter with a fair FIFO contract.
///
/// # Invariants
/// - Waiters acquire strictly in ticket order; a released permit always goes
///   to the oldest waiter.
pub struct RateLimiter {
    /// Guarded limiter bookkeeping.
    state: Mutex<LimiterState>,
    /// Signalled on permit release and serving advancement.
    changed: Condvar,
}

impl RateLimiter {
    /// Creates a limiter with a fixed permit budget.
    #[must_use]
    pub const fn new(permits: u32) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                available: permits,
                next_ticket: 0,
                now_serving: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Blocks until a permit is available for this caller's turn.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> RateLimitPermit {
        let mut state = lock_recover(&self.state);
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while !(state.now_serving == ticket && state.available > 0) {
            state = self.changed.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.available -= 1;
        state.now_serving += 1;
        self.changed.notify_all();
        drop(state);
        RateLimitPermit {
            limiter: Arc::clone(self),
        }
    }

    /// Returns a permit to the pool.
    fn release(&self) {
        let mut state = lock_recover(&self.state);
        state.available += 1;
        drop(state);
        self.changed.notify_all();
    }
}

/// Held permit; releasing happens on drop.
pub struct RateLimitPermit {
    /// Limiter that issued the permit.
    limiter: Arc<RateLimiter>,
}

impl Drop for RateLimitPermit {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

// ============================================================================
// SECTION: Rate Limiter Registry
// ============================================================================

/// Process-wide registry of named rate limiters.
///
/// Unconfigured services are unlimited; acquisition returns no permit and
/// never blocks.
#[derive(Default)]
pub struct RateLimiterRegistry {
    /// Limiters keyed by service name.
    limiters: Mutex<BTreeMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures a limiter for a service, replacing any previous budget.
    pub fn configure(&self, service: impl Into<String>, permits: u32) {
        let mut limiters = lock_recover(&self.limiters);
        limiters.insert(service.into(), Arc::new(RateLimiter::new(permits)));
    }

    /// Acquires a permit for a service, blocking fairly when saturated.
    ///
    /// Returns `None` when the service has no configured limiter.
    #[must_use]
    pub fn acquire(&self, service: &str) -> Option<RateLimitPermit> {
        let limiter = {
            let limiters = lock_recover(&self.limiters);
            limiters.get(service).cloned()
        };
        limiter.map(|limiter| limiter.acquire())
    }
}

// ============================================================================
// SECTION: Fingerprint Key
// ============================================================================

/// Credential fingerprint key material.
///
/// The debug form never reveals the key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FingerprintKey(Vec<u8>);

impl FingerprintKey {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for FingerprintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FingerprintKey(<{} bytes>)", self.0.len())
    }
}

// ============================================================================
// SECTION: Runtime Services
// ============================================================================

/// Shared services threaded through every plugin context.
#[derive(Clone)]
pub struct RuntimeServices {
    /// Clock seam.
    clock: Arc<dyn Clock>,
    /// Named rate limiters.
    rate_limits: Arc<RateLimiterRegistry>,
    /// Optional credential fingerprint key.
    fingerprint_key: Option<FingerprintKey>,
}

impl RuntimeServices {
    /// Creates services around a clock with an empty limiter registry.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rate_limits: Arc::new(RateLimiterRegistry::new()),
            fingerprint_key: None,
        }
    }

    /// Replaces the rate limiter registry.
    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: Arc<RateLimiterRegistry>) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    /// Installs a credential fingerprint key.
    #[must_use]
    pub fn with_fingerprint_key(mut self, key: FingerprintKey) -> Self {
        self.fingerprint_key = Some(key);
        self
    }

    /// Returns the current time from the clock seam.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Returns the rate limiter registry.
    #[must_use]
    pub fn rate_limits(&self) -> &RateLimiterRegistry {
        &self.rate_limits
    }

    /// Returns a clone of the limiter registry handle.
    #[must_use]
    pub fn rate_limits_handle(&self) -> Arc<RateLimiterRegistry> {
        Arc::clone(&self.rate_limits)
    }

    /// Returns the credential fingerprint key, when configured.
    #[must_use]
    pub const fn fingerprint_key(&self) -> Option<&FingerprintKey> {
        self.fingerprint_key.as_ref()
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// Deterministic clock for tests and examples.
#[derive(Debug)]
pub struct ManualClock {
    /// Guarded current time in unix milliseconds.
    now: Mutex<i64>,
}

impl ManualClock {
    /// Creates a clock starting at the given unix milliseconds.
    #[must_use]
    pub const fn starting_at(millis: i64) -> Self {
        Self {
            now: Mutex::new(millis),
        }
    }

    /// Advances the clock by the given milliseconds.
    pub fn advance(&self, millis: i64) {
        let mut now = lock_recover(&self.now);
        *now = now.saturating_add(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(*lock_recover(&self.now))
    }
}
