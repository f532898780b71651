// crates/phi-gate-core/src/core/time.rs
// ============================================================================
// Module: PHI Gate Time Model
// Description: Canonical timestamps and the injectable clock abstraction.
// Purpose: Keep TTL and deadline arithmetic deterministic and testable.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! All lifecycle decisions in PHI Gate (session TTLs, queue deadlines, task
//! deadlines, token expiry) compare explicit [`Timestamp`] values. Components
//! read time only through the [`Clock`] trait supplied by the host, so
//! boundary behavior is exact under test: expiry at the TTL boundary is
//! inclusive, and no component consults the wall clock directly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in milliseconds since the Unix epoch.
///
/// # Invariants
/// - Arithmetic saturates; timestamps never wrap.
/// - Comparisons are total; later instants compare greater.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from raw epoch milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the raw epoch milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp advanced by the given number of milliseconds.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: u64) -> Self {
        let millis = if millis > i64::MAX as u64 { i64::MAX } else { millis as i64 };
        Self(self.0.saturating_add(millis))
    }

    /// Returns the non-negative number of milliseconds elapsed since
    /// `earlier`, or zero when `earlier` is in the future.
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> u64 {
        let delta = self.0.saturating_sub(earlier.0);
        if delta < 0 { 0 } else { delta as u64 }
    }

    /// Returns true when this instant is at or past the given deadline.
    ///
    /// Deadlines in PHI Gate are inclusive: an event occurring exactly at the
    /// deadline is already expired.
    #[must_use]
    pub const fn reached(self, deadline: Self) -> bool {
        self.0 >= deadline.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Host-supplied time source.
///
/// Implementations must be cheap to call and safe to share across tasks.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Timestamp;
}

/// Clock backed by the operating system wall clock.
///
/// # Invariants
/// - Instants before the Unix epoch clamp to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}

/// Manually advanced clock for deterministic hosts and tests.
///
/// # Invariants
/// - Time only moves when the host moves it; `advance` is monotonic.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Current instant in epoch milliseconds.
    now_millis: AtomicI64,
}

impl ManualClock {
    /// Creates a manual clock starting at the given instant.
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            now_millis: AtomicI64::new(start.as_unix_millis()),
        }
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        self.now_millis.fetch_add(millis, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, instant: Timestamp) {
        self.now_millis.store(instant.as_unix_millis(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.now_millis.load(Ordering::SeqCst))
    }
}
