// crates/phi-gate-core/src/core/task.rs
// ============================================================================
// Module: PHI Gate Task Model
// Description: Queued work units, stages, queues, and retry arithmetic.
// Purpose: Define the task vocabulary consumed by the async task runner.
// Dependencies: serde, serde_json, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! A task is one unit of queued work with medical-grade failure policy:
//! bounded retries with jittered exponential backoff, escalation on
//! exhaustion or contract violation, and cooperative cancellation. Workflow
//! edges are declared on the task; the runner schedules downstream stages
//! only after the producing task acknowledges success.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Queues
// ============================================================================

/// Named task queues in strict priority order.
///
/// # Invariants
/// - Priority ordering is fixed: `MedicalPriority` drains first,
///   `AuditLogging` last; starvation is bounded by a reserved minimum
///   concurrency share per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Human review and emergency work.
    MedicalPriority,
    /// Media download and detection.
    ImageProcessing,
    /// Outbound notification delivery.
    Notifications,
    /// Audit finalization; latency-insensitive.
    AuditLogging,
}

impl QueueName {
    /// All queues in strict priority order, highest first.
    pub const PRIORITY_ORDER: [Self; 4] =
        [Self::MedicalPriority, Self::ImageProcessing, Self::Notifications, Self::AuditLogging];

    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MedicalPriority => "medical_priority",
            Self::ImageProcessing => "image_processing",
            Self::Notifications => "notifications",
            Self::AuditLogging => "audit_logging",
        }
    }

    /// Parses a stored label back into a queue name.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "medical_priority" => Some(Self::MedicalPriority),
            "image_processing" => Some(Self::ImageProcessing),
            "notifications" => Some(Self::Notifications),
            "audit_logging" => Some(Self::AuditLogging),
            _ => None,
        }
    }

    /// Returns the queue's position in the priority order, zero highest.
    #[must_use]
    pub const fn priority_index(self) -> usize {
        match self {
            Self::MedicalPriority => 0,
            Self::ImageProcessing => 1,
            Self::Notifications => 2,
            Self::AuditLogging => 3,
        }
    }
}

// ============================================================================
// SECTION: Stages
// ============================================================================

/// Workflow stage a task executes.
///
/// # Invariants
/// - The clinical analysis workflow is the ordered chain `ImagePrep ->
///   Detection -> Decision -> Notification -> AuditFinalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Download and validate referenced media.
    ImagePrep,
    /// Run the detector adapter.
    Detection,
    /// Assemble the medical decision.
    Decision,
    /// Deliver the clinical notification.
    Notification,
    /// Write the closing audit entry and close the session.
    AuditFinalize,
    /// Direct human review of the case.
    HumanReview,
}

impl Stage {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImagePrep => "image_prep",
            Self::Detection => "detection",
            Self::Decision => "decision",
            Self::Notification => "notification",
            Self::AuditFinalize => "audit_finalize",
            Self::HumanReview => "human_review",
        }
    }

    /// Parses a stored label back into a stage.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "image_prep" => Some(Self::ImagePrep),
            "detection" => Some(Self::Detection),
            "decision" => Some(Self::Decision),
            "notification" => Some(Self::Notification),
            "audit_finalize" => Some(Self::AuditFinalize),
            "human_review" => Some(Self::HumanReview),
            _ => None,
        }
    }

    /// Returns the queue a stage executes on.
    #[must_use]
    pub const fn queue(self) -> QueueName {
        match self {
            Self::ImagePrep | Self::Detection => QueueName::ImageProcessing,
            Self::Decision => QueueName::MedicalPriority,
            Self::Notification => QueueName::Notifications,
            Self::AuditFinalize => QueueName::AuditLogging,
            Self::HumanReview => QueueName::MedicalPriority,
        }
    }

    /// Returns the next stage in the clinical analysis workflow.
    #[must_use]
    pub const fn next_in_workflow(self) -> Option<Self> {
        match self {
            Self::ImagePrep => Some(Self::Detection),
            Self::Detection => Some(Self::Decision),
            Self::Decision => Some(Self::Notification),
            Self::Notification => Some(Self::AuditFinalize),
            Self::AuditFinalize | Self::HumanReview => None,
        }
    }
}

// ============================================================================
// SECTION: Task Specification
// ============================================================================

/// One queued unit of work.
///
/// # Invariants
/// - `attempt <= max_attempts` at all times; the runner escalates at the cap.
/// - References only a token identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task identifier.
    pub task_id: TaskId,
    /// Queue the task is scheduled on.
    pub queue: QueueName,
    /// Session the task belongs to.
    pub session_id: SessionId,
    /// Processing token the task operates for.
    pub token_id: TokenId,
    /// Workflow stage.
    pub stage: Stage,
    /// Structured stage payload.
    pub payload: Value,
    /// Delivery attempt, starting at one.
    pub attempt: u32,
    /// Maximum delivery attempts before escalation.
    pub max_attempts: u32,
    /// Base retry delay in milliseconds.
    pub retry_delay_base_ms: u64,
    /// Absolute execution deadline.
    pub deadline: Timestamp,
    /// Correlation identifier for the session's audit trail.
    pub correlation_id: CorrelationId,
}

impl TaskSpec {
    /// Returns true when the task has attempts remaining after a failure.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

// ============================================================================
// SECTION: Terminal States and Backoff
// ============================================================================

/// Terminal disposition of a task.
///
/// # Invariants
/// - Variants are stable for audit labeling.
/// - `Canceled` is terminal but is not a failure: no retry, no escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDisposition {
    /// Acknowledged after success.
    Succeeded,
    /// Canceled cooperatively by session expiry or close.
    Canceled,
    /// Escalated to human review after exhaustion or contract violation.
    Escalated,
}

impl TaskDisposition {
    /// Returns a stable label for audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Canceled => "canceled",
            Self::Escalated => "escalated",
        }
    }
}

/// Maximum backoff exponent applied before the delay saturates.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Computes the retry delay for a failed attempt.
///
/// The delay doubles per attempt (`base * 2^(attempt-1)`) and the caller's
/// jitter in permille of the raw delay, clamped to `[-100, 100]` (that is,
/// plus or minus ten percent), is added. Passing the jitter in keeps the
/// function deterministic under test.
#[must_use]
pub fn retry_delay_ms(base_ms: u64, attempt: u32, jitter_permille: i32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    let raw = base_ms.saturating_mul(1_u64 << exponent);
    let clamped = i64::from(jitter_permille.clamp(-100, 100));
    let adjustment = (raw / 1_000).saturating_mul(clamped.unsigned_abs());
    if clamped < 0 { raw.saturating_sub(adjustment) } else { raw.saturating_add(adjustment) }
}
