// crates/phi-gate-core/src/core/cancel.rs
// ============================================================================
// Module: Cancellation Signal
// Description: Explicit cooperative cancellation passed into suspendable calls.
// Purpose: Propagate session expiry and close downward without implicit context.
// Dependencies: none
// ============================================================================

//! ## Overview
//! Cancellation in PHI Gate is explicit: every suspendable call receives a
//! [`CancelSignal`] as a parameter, and long stages poll it at checkpoints.
//! Signals form a one-way hierarchy: canceling a parent cancels every child
//! derived from it, never the reverse. A signal latches: once canceled it
//! stays canceled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

// ============================================================================
// SECTION: Signal
// ============================================================================

/// Latching cooperative cancellation signal.
///
/// # Invariants
/// - Once canceled, `is_canceled` returns true forever.
/// - A child observes every ancestor's latch; no ancestor observes a child's.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    /// Ancestor latches, observed but never set through this handle.
    ancestors: Vec<Arc<AtomicBool>>,
    /// Own latch.
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Creates a fresh, uncanceled root signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a child signal that also observes this signal's latches.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.flag));
        Self {
            ancestors,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Latches this signal (and thereby every derived child).
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true when this signal or an ancestor has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.ancestors.iter().any(|flag| flag.load(Ordering::SeqCst))
    }
}
