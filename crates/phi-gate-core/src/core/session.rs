// crates/phi-gate-core/src/core/session.rs
// ============================================================================
// Module: PHI Gate Session Model
// Description: Bounded interaction envelope keyed to a processing token.
// Purpose: Model the session lifecycle with an inclusive hard TTL.
// Dependencies: serde, crate::core::{identifiers, input, time}
// ============================================================================

//! ## Overview
//! A session is the envelope from one inbound event through final
//! notification. Sessions reference only a token identifier, never a patient
//! identifier. The lifecycle is `active -> (expired | closed)`; expiry is
//! inclusive at the TTL boundary and expired sessions are never revived; a
//! new session must be created.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TokenId;
use crate::core::input::InputType;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Session States
// ============================================================================

/// Lifecycle state of a session.
///
/// # Invariants
/// - `Active` implies `now - last_touched_at <= ttl` at all observation
///   points; the sweeper enforces the bound at 1 Hz.
/// - `Expired` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepting input and producing tasks.
    Active,
    /// TTL or input deadline elapsed; all in-flight work canceled.
    Expired,
    /// Finalized by the Dispatcher with an outcome.
    Closed,
}

impl SessionState {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Closed => "closed",
        }
    }

    /// Parses a stored label back into a state.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "active" => Some(Self::Active),
            "expired" => Some(Self::Expired),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Returns true when the state accepts touches and new tasks.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Final outcome recorded when a session closes.
///
/// # Invariants
/// - Variants are stable for storage and audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Workflow completed through notification.
    Completed,
    /// Triage rejected the input.
    Rejected,
    /// Case transferred to human review.
    HumanReview,
    /// Host shut the session down before completion.
    Aborted,
}

impl SessionOutcome {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::HumanReview => "human_review",
            Self::Aborted => "aborted",
        }
    }
}

// ============================================================================
// SECTION: Session Record
// ============================================================================

/// Mutable session record held by the Session Manager.
///
/// # Invariants
/// - References only a `token_id`, never a patient identifier.
/// - `last_touched_at >= created_at` at all times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: SessionId,
    /// Processing token the session is keyed to.
    pub token_id: TokenId,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last touch instant; the TTL measures from here.
    pub last_touched_at: Timestamp,
    /// Lifecycle state.
    pub state: SessionState,
    /// Input classification that opened the session.
    pub input_type: InputType,
    /// Correlation identifier for the session's audit trail.
    pub audit_trail_id: CorrelationId,
    /// Outcome recorded at close, when closed.
    pub outcome: Option<SessionOutcome>,
}

impl SessionRecord {
    /// Returns true when the session has reached its TTL at `now`.
    ///
    /// The boundary is inclusive: a session observed exactly at
    /// `last_touched_at + ttl_millis` is expired.
    #[must_use]
    pub const fn ttl_elapsed(&self, now: Timestamp, ttl_millis: u64) -> bool {
        now.reached(self.last_touched_at.saturating_add_millis(ttl_millis))
    }

    /// Returns a read-only snapshot of the record.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            token_id: self.token_id.clone(),
            created_at: self.created_at,
            last_touched_at: self.last_touched_at,
            state: self.state,
            input_type: self.input_type,
            audit_trail_id: self.audit_trail_id.clone(),
        }
    }
}

/// Read-only view of a session handed to triage and the task pipeline.
///
/// # Invariants
/// - Values are a snapshot; holders must not assume freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub session_id: SessionId,
    /// Processing token the session is keyed to.
    pub token_id: TokenId,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Last touch instant.
    pub last_touched_at: Timestamp,
    /// Lifecycle state at snapshot time.
    pub state: SessionState,
    /// Input classification that opened the session.
    pub input_type: InputType,
    /// Correlation identifier for the session's audit trail.
    pub audit_trail_id: CorrelationId,
}
