// crates/phi-gate-core/src/core/decision.rs
// ============================================================================
// Module: PHI Gate Decision Types
// Description: Detection results, evidence grades, and medical decisions.
// Purpose: Model the clinical outputs flowing from detection to notification.
// Dependencies: serde, crate::core::{identifiers, time, triage}
// ============================================================================

//! ## Overview
//! Detection and decision records are Processing Store entities keyed by
//! token identifier only. A [`MedicalDecision`] is assembled by the decision
//! engine facade from pluggable guideline modules; the merge rules live in
//! [`crate::runtime::decision`], the data shapes live here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;
use crate::core::triage::Urgency;

// ============================================================================
// SECTION: Detection
// ============================================================================

/// Pressure injury severity grade.
///
/// # Invariants
/// - Grades follow the international 0-4 scale; construction rejects values
///   above four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LppGrade(u8);

impl LppGrade {
    /// Creates a grade, rejecting values above four.
    #[must_use]
    pub const fn new(grade: u8) -> Option<Self> {
        if grade <= 4 { Some(Self(grade)) } else { None }
    }

    /// Returns the raw grade value.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns true for grades three and four.
    #[must_use]
    pub const fn is_high_grade(self) -> bool {
        self.0 >= 3
    }
}

/// Anatomical location of a detected injury.
///
/// # Invariants
/// - Variants are stable for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnatomicalLocation {
    /// Sacral region.
    Sacrum,
    /// Heel.
    Heel,
    /// Ischial tuberosity.
    Ischium,
    /// Greater trochanter.
    Trochanter,
    /// Occiput.
    Occiput,
    /// Any other documented site.
    Other,
}

impl AnatomicalLocation {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sacrum => "sacrum",
            Self::Heel => "heel",
            Self::Ischium => "ischium",
            Self::Trochanter => "trochanter",
            Self::Occiput => "occiput",
            Self::Other => "other",
        }
    }

    /// Parses a stored label back into a location.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "sacrum" => Some(Self::Sacrum),
            "heel" => Some(Self::Heel),
            "ischium" => Some(Self::Ischium),
            "trochanter" => Some(Self::Trochanter),
            "occiput" => Some(Self::Occiput),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Detection result produced by the computer-vision adapter.
///
/// # Invariants
/// - References only a token identifier.
/// - `confidence` lies in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LppDetection {
    /// Processing token the detection belongs to.
    pub token_id: TokenId,
    /// Injury severity grade.
    pub grade: LppGrade,
    /// Model confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Anatomical site.
    pub location: AnatomicalLocation,
    /// Detector model version label.
    pub model_version: String,
    /// Instant the detection was produced.
    pub detected_at: Timestamp,
}

/// Image record registered in the Processing Store before download.
///
/// # Invariants
/// - References only a token identifier; the image itself stays in the
///   signed object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalImage {
    /// Processing token the image belongs to.
    pub token_id: TokenId,
    /// Signed object store URL.
    pub url: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Lowercase hex SHA-256 content hash.
    pub content_hash: String,
    /// Instant the image reference was registered.
    pub registered_at: Timestamp,
}

// ============================================================================
// SECTION: Evidence and Recommendations
// ============================================================================

/// Evidence grade of a guideline module's contribution.
///
/// # Invariants
/// - `A` is strongest; merge takes the worst contributing grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvidenceLevel {
    /// Strong evidence from multiple controlled trials.
    A,
    /// Moderate evidence.
    B,
    /// Expert consensus.
    C,
}

impl EvidenceLevel {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
        }
    }

    /// Returns the weaker of two evidence grades.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

/// One coded clinical action.
///
/// # Invariants
/// - `code` is the identity for de-duplication during merge; first-seen
///   ordering is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Coded action identifier.
    pub code: String,
    /// Human-readable directive for the clinical team.
    pub directive: String,
}

/// External guideline citation supporting a decision.
///
/// # Invariants
/// - Citations are references only; the knowledge base is pluggable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidelineReference {
    /// Guideline source label.
    pub source: String,
    /// Section or recommendation identifier within the source.
    pub section: String,
}

// ============================================================================
// SECTION: Medical Decision
// ============================================================================

/// Evidence-based recommendation assembled by the decision engine facade.
///
/// # Invariants
/// - References only a token identifier.
/// - `escalation_required` is true whenever any contributing module reported
///   confidence below the configured medical threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicalDecision {
    /// Processing token the decision belongs to.
    pub token_id: TokenId,
    /// Merged urgency grade.
    pub urgency_level: Urgency,
    /// Worst evidence grade across contributing modules.
    pub evidence_level: EvidenceLevel,
    /// Coded actions, first-seen order preserved.
    pub recommendations: Vec<Recommendation>,
    /// Supporting guideline citations.
    pub references: Vec<GuidelineReference>,
    /// Whether the case must reach human review.
    pub escalation_required: bool,
    /// Follow-up interval in hours.
    pub follow_up_interval_hours: u32,
    /// Narrative justification assembled from contributing modules.
    pub justification_text: String,
    /// Instant the decision was assembled.
    pub decided_at: Timestamp,
}

/// Contribution returned by one guideline module.
///
/// # Invariants
/// - `confidence` lies in `[0.0, 1.0]`; values below the configured medical
///   threshold force escalation during merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDecision {
    /// Module's urgency assessment.
    pub urgency: Urgency,
    /// Module's evidence grade.
    pub evidence_level: EvidenceLevel,
    /// Module's confidence in its contribution.
    pub confidence: f64,
    /// Coded actions proposed by the module.
    pub recommendations: Vec<Recommendation>,
    /// Citations supporting the proposal.
    pub references: Vec<GuidelineReference>,
    /// Proposed follow-up interval in hours, when the module has an opinion.
    pub follow_up_interval_hours: Option<u32>,
    /// One-sentence justification fragment.
    pub justification: String,
}
