// crates/phi-gate-core/src/core/fault.rs
// ============================================================================
// Module: PHI Gate Fault Taxonomy
// Description: Uniform error classification driving retry and escalation.
// Purpose: Give every component error a stable retry/escalation policy.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every error surfaced by a PHI Gate component carries a [`FaultKind`]. The
//! task runner and dispatcher consult only the kind when deciding between
//! retry, deterministic rejection, escalation to human review, and degraded
//! refusal. No error is ever silently swallowed; every terminal fault emits
//! exactly one audit entry at the point it becomes terminal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Fault Kinds
// ============================================================================

/// Classification of a component failure.
///
/// # Invariants
/// - Variants are stable for audit labeling and programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Transport-level rejection: bad signature, unsupported media, oversize,
    /// malformed payload. Surfaced as 4xx, audited, never retried.
    InputRejected,
    /// Store unavailable, adapter timeout, network fault. Retried with
    /// exponential backoff up to the configured attempt cap.
    Transient,
    /// Deterministic business conflict: active token exists, session expired,
    /// duplicate processing identifier. Reported to the caller, not retried.
    BusinessConflict,
    /// Contract violation: PHI present in a tokenized payload, schema breach,
    /// decryption failure. Fails immediately with escalation and a security
    /// audit entry.
    NonRetryable,
    /// Medical signal below the confidence threshold. Not a fault in the
    /// infrastructure sense; forces escalation to human review.
    LowConfidence,
    /// Invariant violation that cannot be reconciled. The affected token is
    /// refused new work until operator intervention.
    Fatal,
}

impl FaultKind {
    /// Returns a stable label for audit entries and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputRejected => "input_rejected",
            Self::Transient => "transient",
            Self::BusinessConflict => "business_conflict",
            Self::NonRetryable => "non_retryable",
            Self::LowConfidence => "low_confidence",
            Self::Fatal => "fatal",
        }
    }

    /// Returns true when the failure may be retried with backoff.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true when the failure must terminate in a human-review
    /// escalation rather than a retry or a caller-visible rejection.
    #[must_use]
    pub const fn escalates(self) -> bool {
        matches!(self, Self::NonRetryable | Self::LowConfidence | Self::Fatal)
    }

    /// Returns true when the failure marks the component degraded for the
    /// affected token until operator intervention.
    #[must_use]
    pub const fn degrades(self) -> bool {
        matches!(self, Self::Fatal)
    }
}

/// Error types that expose their fault classification.
pub trait Classified {
    /// Returns the fault classification for this error.
    fn fault_kind(&self) -> FaultKind;
}
