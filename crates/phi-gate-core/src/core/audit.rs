// crates/phi-gate-core/src/core/audit.rs
// ============================================================================
// Module: PHI Gate Audit Records
// Description: Append-only audit vocabulary spanning both trust zones by token.
// Purpose: Give every state transition exactly one immutable, token-keyed entry.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! The Audit Log is the only record permitted to span the two stores, and it
//! does so by token identifier, never by name. Components emit an
//! [`AuditRecord`]; the log assigns the monotonic entry identifier on append
//! and returns the immutable [`AuditEntry`]. Actions and outcomes are closed
//! vocabularies so entries stay machine-checkable for the lifetime of the
//! retention window.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ActorId;
use crate::core::identifiers::AuditEntryId;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Components
// ============================================================================

/// Component that emitted an audit entry.
///
/// # Invariants
/// - Variants are stable for storage and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    /// Tokenization Service.
    Tokenization,
    /// Input Packager and Input Queue.
    InputQueue,
    /// Session Manager.
    SessionManager,
    /// Triage Engine (emitted via the Dispatcher).
    Triage,
    /// Medical Dispatcher.
    Dispatcher,
    /// Async Task Runner.
    TaskRunner,
    /// Decision Engine facade.
    DecisionEngine,
    /// Outbound notification adapter.
    Notifier,
    /// HTTP surface (webhook and Tokenization API).
    Server,
}

impl Component {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tokenization => "tokenization",
            Self::InputQueue => "input_queue",
            Self::SessionManager => "session_manager",
            Self::Triage => "triage",
            Self::Dispatcher => "dispatcher",
            Self::TaskRunner => "task_runner",
            Self::DecisionEngine => "decision_engine",
            Self::Notifier => "notifier",
            Self::Server => "server",
        }
    }
}

// ============================================================================
// SECTION: Actions
// ============================================================================

/// Closed vocabulary of auditable actions.
///
/// # Invariants
/// - Variants are stable for storage and queries; additions are append-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Inbound event accepted by the packager.
    InputReceived,
    /// Inbound event refused at the transport or packager boundary.
    InputRejected,
    /// Queue entry purged past its deadline.
    InputExpired,
    /// Session created for a token.
    SessionCreated,
    /// Session closed with an outcome.
    SessionClosed,
    /// Session expired by TTL or input deadline.
    SessionExpired,
    /// Triage routed an input to routine processing.
    TriageRoutine,
    /// Triage routed an input with urgent grading.
    TriageUrgent,
    /// Triage routed an input with emergency grading.
    TriageEmergency,
    /// Triage rejected an input.
    TriageReject,
    /// Task scheduled onto a queue.
    TaskEnqueued,
    /// Task acknowledged after success.
    TaskSucceeded,
    /// Task rescheduled after a transient failure.
    TaskRetried,
    /// Task canceled cooperatively.
    TaskCanceled,
    /// Task escalated to human review.
    TaskEscalated,
    /// Notification delivered to a clinical channel.
    NotificationSent,
    /// Notification delivery permanently failed.
    NotificationFailed,
    /// Token requested through the Tokenization API.
    TokenRequested,
    /// Two-phase tokenization write completed.
    TokenApproved,
    /// Token revoked.
    TokenRevoked,
    /// Pending request expired by reconciliation or TTL.
    TokenExpired,
    /// Tokenized projection resolved by a processing component.
    TokenResolved,
    /// Audited reverse lookup through the bridge role.
    BridgeLookup,
    /// Medical decision assembled and persisted.
    DecisionRecorded,
    /// Medical signal fell below the confidence threshold.
    LowConfidence,
    /// Contract violation detected (PHI leak, schema breach, decrypt failure).
    SecurityViolation,
    /// Unreconcilable invariant violation; the token is refused new work
    /// until operator intervention.
    ComponentDegraded,
    /// Encryption key rotated.
    KeyRotated,
}

impl AuditAction {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputReceived => "input_received",
            Self::InputRejected => "input_rejected",
            Self::InputExpired => "input_expired",
            Self::SessionCreated => "session_created",
            Self::SessionClosed => "session_closed",
            Self::SessionExpired => "session_expired",
            Self::TriageRoutine => "triage_routine",
            Self::TriageUrgent => "triage_urgent",
            Self::TriageEmergency => "triage_emergency",
            Self::TriageReject => "triage_reject",
            Self::TaskEnqueued => "task_enqueued",
            Self::TaskSucceeded => "task_succeeded",
            Self::TaskRetried => "task_retried",
            Self::TaskCanceled => "task_canceled",
            Self::TaskEscalated => "task_escalated",
            Self::NotificationSent => "notification_sent",
            Self::NotificationFailed => "notification_failed",
            Self::TokenRequested => "token_requested",
            Self::TokenApproved => "token_approved",
            Self::TokenRevoked => "token_revoked",
            Self::TokenExpired => "token_expired",
            Self::TokenResolved => "token_resolved",
            Self::BridgeLookup => "bridge_lookup",
            Self::DecisionRecorded => "decision_recorded",
            Self::LowConfidence => "low_confidence",
            Self::SecurityViolation => "security_violation",
            Self::ComponentDegraded => "component_degraded",
            Self::KeyRotated => "key_rotated",
        }
    }
}

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Outcome recorded on an audit entry.
///
/// # Invariants
/// - Variants are stable for storage and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Action completed normally.
    Ok,
    /// Action refused deterministically.
    Rejected,
    /// Action lapsed by deadline or TTL.
    Expired,
    /// Action canceled cooperatively.
    Canceled,
    /// Action transferred to human review.
    Escalated,
    /// Action failed terminally without escalation semantics.
    Failed,
}

impl AuditOutcome {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Canceled => "canceled",
            Self::Escalated => "escalated",
            Self::Failed => "failed",
        }
    }
}

// ============================================================================
// SECTION: Records and Entries
// ============================================================================

/// Audit record as emitted by a component, before the log assigns an
/// entry identifier.
///
/// # Invariants
/// - References only a token identifier, never a patient identifier.
/// - `detail` carries a stage or reason label, never free-form content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Emission instant.
    pub timestamp: Timestamp,
    /// Component or authenticated caller that acted.
    pub actor_id: ActorId,
    /// Processing token the action concerns, when one exists.
    pub token_id: Option<TokenId>,
    /// Action performed.
    pub action: AuditAction,
    /// Component that emitted the record.
    pub component: Component,
    /// Outcome of the action.
    pub outcome: AuditOutcome,
    /// Correlation identifier tying the logical action together.
    pub correlation_id: CorrelationId,
    /// Optional stable detail label (stage name, reason code).
    pub detail: Option<String>,
}

/// Immutable, identified audit entry as returned by reads.
///
/// # Invariants
/// - Entries are never updated or deleted inside the retention window.
/// - `entry_id` is strictly increasing in append order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic entry identifier assigned on append.
    pub entry_id: AuditEntryId,
    /// The record as emitted.
    #[serde(flatten)]
    pub record: AuditRecord,
}
