// crates/phi-gate-core/src/core/phi.rs
// ============================================================================
// Module: PHI Guard
// Description: Leak scan applied to every Processing Store write candidate.
// Purpose: Fail closed when identifying values appear in tokenized payloads.
// Dependencies: crate::core::patient
// ============================================================================

//! ## Overview
//! The guard compares candidate Processing Store text against the identifying
//! columns of the corresponding hospital record: full name (and each name
//! fragment), medical record number, phone number (digits-only comparison),
//! and date of birth. A hit is a contract violation: the write is refused,
//! the fault is `NonRetryable`, and a security audit entry is emitted by the
//! caller. The scan is case-insensitive and ignores values shorter than three
//! characters to avoid false hits on trivial substrings.
//!
//! Security posture: the guard is the last line before the trust boundary;
//! see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use crate::core::patient::HospitalPatient;
use crate::core::patient::TokenizedPatient;

// ============================================================================
// SECTION: Violations
// ============================================================================

/// Minimum length for a hospital value to participate in the scan.
const MIN_SCAN_LENGTH: usize = 3;

/// Identifying column whose value leaked into a candidate payload.
///
/// # Invariants
/// - Variants are stable for security audit labeling.
/// - A violation names the column only, never the leaked value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhiViolation {
    /// Full name or a name fragment appeared.
    FullName,
    /// Medical record number appeared.
    HospitalMrn,
    /// Phone number appeared.
    PhoneNumber,
    /// Date of birth appeared.
    DateOfBirth,
}

impl PhiViolation {
    /// Returns a stable label for security audit entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FullName => "full_name",
            Self::HospitalMrn => "hospital_mrn",
            Self::PhoneNumber => "phone_number",
            Self::DateOfBirth => "date_of_birth",
        }
    }
}

impl fmt::Display for PhiViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Scan Functions
// ============================================================================

/// Scans one candidate text against a hospital record.
///
/// Returns the first violated column, or `None` when the text is clean.
#[must_use]
pub fn scan_text(record: &HospitalPatient, candidate: &str) -> Option<PhiViolation> {
    let lowered = candidate.to_lowercase();

    let full_name = record.full_name.to_lowercase();
    if contains_value(&lowered, &full_name) {
        return Some(PhiViolation::FullName);
    }
    for fragment in full_name.split_whitespace() {
        if contains_value(&lowered, fragment) {
            return Some(PhiViolation::FullName);
        }
    }

    if contains_value(&lowered, &record.hospital_mrn.as_str().to_lowercase()) {
        return Some(PhiViolation::HospitalMrn);
    }

    let phone_digits = digits_only(&record.phone_number);
    if contains_value(&digits_only(&lowered), &phone_digits) {
        return Some(PhiViolation::PhoneNumber);
    }

    if contains_value(&lowered, &record.date_of_birth.to_lowercase()) {
        return Some(PhiViolation::DateOfBirth);
    }

    None
}

/// Scans a tokenized projection against its hospital record before the
/// Processing Store write.
///
/// Every free-text field of the projection is checked: the alias and each
/// sanitized condition code.
#[must_use]
pub fn scan_projection(
    record: &HospitalPatient,
    projection: &TokenizedPatient,
) -> Option<PhiViolation> {
    if let Some(violation) = scan_text(record, projection.patient_alias.as_str()) {
        return Some(violation);
    }
    projection
        .medical_conditions
        .iter()
        .find_map(|condition| scan_text(record, condition))
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Substring check gated on the minimum scan length.
fn contains_value(haystack: &str, needle: &str) -> bool {
    needle.len() >= MIN_SCAN_LENGTH && haystack.contains(needle)
}

/// Strips everything but ASCII digits, for phone comparisons.
fn digits_only(value: &str) -> String {
    value.chars().filter(char::is_ascii_digit).collect()
}
