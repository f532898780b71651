// crates/phi-gate-core/src/core/triage.rs
// ============================================================================
// Module: PHI Gate Triage Types
// Description: Urgency grades, routes, and reason codes for triage decisions.
// Purpose: Provide the stable vocabulary shared by triage and the decision engine.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Triage classifies a packaged input into an urgency grade and a route using
//! a closed rule set. The vocabulary here is shared with the decision engine:
//! [`Urgency`] orders clinically (`Routine < Urgent < Emergency`) so merge
//! rules can take the maximum.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Urgency
// ============================================================================

/// Clinical urgency grade.
///
/// # Invariants
/// - Ordering is clinical severity: `Routine < Urgent < Emergency`.
/// - Variants are stable for storage and audit labeling.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Routine follow-up pace.
    Routine,
    /// Same-day clinical attention.
    Urgent,
    /// Immediate clinical attention.
    Emergency,
}

impl Urgency {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Urgent => "urgent",
            Self::Emergency => "emergency",
        }
    }

    /// Parses a stored label back into an urgency grade.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "routine" => Some(Self::Routine),
            "urgent" => Some(Self::Urgent),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Routes and Reason Codes
// ============================================================================

/// Destination a triaged input is routed to.
///
/// # Invariants
/// - Variants are stable for storage and audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageRoute {
    /// Staged clinical analysis workflow.
    ClinicalProcessing,
    /// Direct transfer to the human review queue.
    HumanReview,
    /// Refused; audited and acknowledged, no workflow.
    Reject,
}

impl TriageRoute {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClinicalProcessing => "clinical_processing",
            Self::HumanReview => "human_review",
            Self::Reject => "reject",
        }
    }
}

/// Closed set of reasons a triage decision can cite.
///
/// # Invariants
/// - The set is closed; rules cite codes, never free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Media attached alongside a coded pain report.
    ImageWithPainReport,
    /// Repeat submission within the repeat window of an open high-grade case.
    RepeatOfHighGradeCase,
    /// Coded emergency keyword present in the text.
    EmergencyKeyword,
    /// Media volume exceeded the urgent-attention threshold.
    HighMediaVolume,
    /// No urgency trigger fired.
    NoTrigger,
    /// Session was not active at evaluation time.
    SessionNotActive,
    /// Input carried neither text nor media.
    EmptyInput,
    /// Rules could not classify the input decisively.
    Uncertain,
}

impl ReasonCode {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImageWithPainReport => "image_with_pain_report",
            Self::RepeatOfHighGradeCase => "repeat_of_high_grade_case",
            Self::EmergencyKeyword => "emergency_keyword",
            Self::HighMediaVolume => "high_media_volume",
            Self::NoTrigger => "no_trigger",
            Self::SessionNotActive => "session_not_active",
            Self::EmptyInput => "empty_input",
            Self::Uncertain => "uncertain",
        }
    }
}

// ============================================================================
// SECTION: Triage Decision
// ============================================================================

/// Output of one triage evaluation.
///
/// # Invariants
/// - Deterministic: identical inputs produce identical decisions.
/// - Carries no patient identity and is never persisted with PHI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageDecision {
    /// Urgency grade.
    pub urgency: Urgency,
    /// Routing destination.
    pub route: TriageRoute,
    /// Reason codes, in rule evaluation order.
    pub reason_codes: Vec<ReasonCode>,
}
