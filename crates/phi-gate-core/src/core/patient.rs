// crates/phi-gate-core/src/core/patient.rs
// ============================================================================
// Module: PHI Gate Patient Records
// Description: Hospital-zone identity records and their tokenized projections.
// Purpose: Model the two sides of the tokenization bridge with typed records.
// Dependencies: serde, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! The Hospital Store owns [`HospitalPatient`] and [`TokenizationRequest`];
//! the Processing Store owns [`TokenizedPatient`]. The two record families
//! share exactly one field, the token identifier. A tokenized projection
//! carries only coarse, non-identifying attributes; [`crate::core::phi`]
//! enforces that invariant before any Processing Store write.
//!
//! Security posture: hospital records are PHI and must never be serialized
//! outside the hospital trust zone; see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::HospitalMrn;
use crate::core::identifiers::PatientId;
use crate::core::identifiers::RequestId;
use crate::core::identifiers::TokenAlias;
use crate::core::identifiers::TokenId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Hospital Store Records
// ============================================================================

/// Identity record owned exclusively by the Hospital Store.
///
/// # Invariants
/// - Created by the hospital admission flow; never mutated by PHI Gate.
/// - Never transmitted outside the Hospital Store or serialized into queue
///   entries, sessions, tasks, or Processing Store rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HospitalPatient {
    /// Hospital-internal patient identifier.
    pub patient_id: PatientId,
    /// Unique medical record number.
    pub hospital_mrn: HospitalMrn,
    /// Legal full name.
    pub full_name: String,
    /// Date of birth in `YYYY-MM-DD` form.
    pub date_of_birth: String,
    /// Contact phone number.
    pub phone_number: String,
    /// Coded chronic condition terms.
    pub chronic_conditions: BTreeSet<String>,
    /// Attending physician name.
    pub attending_physician: String,
    /// Ward location code.
    pub ward_location: String,
}

/// Approval lifecycle of a tokenization request.
///
/// # Invariants
/// - Variants are stable for storage and audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Phase one written; Processing Store projection not yet confirmed.
    Pending,
    /// Both stores hold the record pair; the token is live.
    Approved,
    /// Token revoked or denied; resolution fails closed.
    Denied,
    /// Token lapsed by TTL or was orphaned by a failed two-phase write.
    Expired,
}

impl ApprovalStatus {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }

    /// Parses a stored label back into a status.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Hospital Store record of one tokenization grant.
///
/// # Invariants
/// - `token_id` is unique across all requests.
/// - At most one `approved` request exists per `(patient_id,
///   requesting_system)` pair at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationRequest {
    /// Request identifier.
    pub request_id: RequestId,
    /// Patient the token stands for.
    pub patient_id: PatientId,
    /// Opaque processing token.
    pub token_id: TokenId,
    /// Non-identifying display alias.
    pub token_alias: TokenAlias,
    /// System the token was issued to.
    pub requesting_system: String,
    /// Approval lifecycle state.
    pub approval_status: ApprovalStatus,
    /// Instant the token lapses.
    pub expires_at: Timestamp,
    /// Instant the request was created.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Processing Store Projection
// ============================================================================

/// Coarse age bucket carried by a tokenized projection.
///
/// # Invariants
/// - Buckets are wide enough that no bucket plus the other projection fields
///   narrows to a natural person within a ward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeRange {
    /// Younger than 18 years.
    Pediatric,
    /// 18 through 39 years.
    Adult,
    /// 40 through 64 years.
    MiddleAged,
    /// 65 through 79 years.
    Senior,
    /// 80 years and older.
    Elderly,
}

impl AgeRange {
    /// Buckets an age in whole years.
    #[must_use]
    pub const fn from_years(years: u8) -> Self {
        match years {
            0..=17 => Self::Pediatric,
            18..=39 => Self::Adult,
            40..=64 => Self::MiddleAged,
            65..=79 => Self::Senior,
            _ => Self::Elderly,
        }
    }

    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pediatric => "pediatric",
            Self::Adult => "adult",
            Self::MiddleAged => "middle_aged",
            Self::Senior => "senior",
            Self::Elderly => "elderly",
        }
    }

    /// Parses a stored label back into a bucket.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pediatric" => Some(Self::Pediatric),
            "adult" => Some(Self::Adult),
            "middle_aged" => Some(Self::MiddleAged),
            "senior" => Some(Self::Senior),
            "elderly" => Some(Self::Elderly),
            _ => None,
        }
    }
}

/// Coarse gender category carried by a tokenized projection.
///
/// # Invariants
/// - Variants are stable for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenderCategory {
    /// Female.
    Female,
    /// Male.
    Male,
    /// Another category.
    Other,
    /// Not recorded.
    Unknown,
}

impl GenderCategory {
    /// Returns a stable label for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Female => "female",
            Self::Male => "male",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a stored label back into a category.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "female" => Some(Self::Female),
            "male" => Some(Self::Male),
            "other" => Some(Self::Other),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Pressure-injury risk factors over a fixed, closed vocabulary.
///
/// # Invariants
/// - The vocabulary is closed: new factors require a schema revision, never a
///   free-form key. Absent factors default to `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RiskFactors {
    /// Diabetes mellitus.
    #[serde(default)]
    pub diabetes: bool,
    /// Limited mobility or bed-bound.
    #[serde(default)]
    pub immobility: bool,
    /// Malnutrition or low albumin.
    #[serde(default)]
    pub malnutrition: bool,
    /// Urinary or fecal incontinence.
    #[serde(default)]
    pub incontinence: bool,
    /// Documented prior pressure injury.
    #[serde(default)]
    pub prior_pressure_injury: bool,
    /// Peripheral vascular disease.
    #[serde(default)]
    pub vascular_disease: bool,
}

impl RiskFactors {
    /// Returns the number of factors present.
    #[must_use]
    pub const fn count(self) -> u8 {
        self.diabetes as u8
            + self.immobility as u8
            + self.malnutrition as u8
            + self.incontinence as u8
            + self.prior_pressure_injury as u8
            + self.vascular_disease as u8
    }
}

/// Non-identifying projection owned exclusively by the Processing Store.
///
/// # Invariants
/// - Contains no attribute derivable to a natural-person identity within the
///   hospital domain; enforced by [`crate::core::phi::scan_projection`].
/// - References the hospital record only through `token_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedPatient {
    /// Opaque processing token.
    pub token_id: TokenId,
    /// Non-identifying display alias.
    pub patient_alias: TokenAlias,
    /// Coarse age bucket.
    pub age_range: AgeRange,
    /// Coarse gender category.
    pub gender_category: GenderCategory,
    /// Closed-vocabulary risk factors.
    pub risk_factors: RiskFactors,
    /// Sanitized condition codes.
    pub medical_conditions: BTreeSet<String>,
    /// Instant the token lapses.
    pub token_expires_at: Timestamp,
}
