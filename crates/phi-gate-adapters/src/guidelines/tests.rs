// crates/phi-gate-adapters/src/guidelines/tests.rs
// ============================================================================
// Module: Guideline Module Tests
// Description: Unit tests for grading, risk modification, and follow-up.
// ============================================================================
//! ## Overview
//! Validates module abstention rules and the clinical mapping from grade to
//! urgency, recommendations, and citations.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeSet;
use std::sync::Arc;

use phi_gate_core::AgeRange;
use phi_gate_core::AnatomicalLocation;
use phi_gate_core::DecisionContext;
use phi_gate_core::DecisionModule;
use phi_gate_core::EvidenceLevel;
use phi_gate_core::GenderCategory;
use phi_gate_core::LppDetection;
use phi_gate_core::LppGrade;
use phi_gate_core::RiskFactors;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::Urgency;

use super::FollowUpModule;
use super::RiskModifierModule;
use super::SeverityGradingModule;
use super::StaticProtocolTable;

fn ctx(detection: Option<(u8, f64)>, risk_factors: RiskFactors) -> DecisionContext {
    let token = TokenId::new("0123456789abcdef0123456789abcdef");
    DecisionContext {
        detection: detection.map(|(grade, confidence)| LppDetection {
            token_id: token.clone(),
            grade: LppGrade::new(grade).unwrap(),
            confidence,
            location: AnatomicalLocation::Sacrum,
            model_version: "detector-1".to_string(),
            detected_at: Timestamp::from_unix_millis(1_000),
        }),
        patient: TokenizedPatient {
            token_id: token,
            patient_alias: TokenAlias::new("Slate Heron"),
            age_range: AgeRange::Senior,
            gender_category: GenderCategory::Unknown,
            risk_factors,
            medical_conditions: BTreeSet::new(),
            token_expires_at: Timestamp::from_unix_millis(i64::MAX),
        },
        triage_urgency: Urgency::Routine,
    }
}

#[test]
fn grading_maps_high_grades_to_emergency_with_citations() {
    let module = SeverityGradingModule::new(Arc::new(StaticProtocolTable));
    let partial = module.evaluate(&ctx(Some((3, 0.88)), RiskFactors::default())).unwrap();
    assert_eq!(partial.urgency, Urgency::Emergency);
    assert_eq!(partial.evidence_level, EvidenceLevel::A);
    assert_eq!(partial.references[0].section, "treatment.stage3");
    assert!(partial.recommendations.iter().any(|rec| rec.code == "surgical_consult"));
}

#[test]
fn grading_maps_low_grades_to_routine() {
    let module = SeverityGradingModule::new(Arc::new(StaticProtocolTable));
    let partial = module.evaluate(&ctx(Some((1, 0.9)), RiskFactors::default())).unwrap();
    assert_eq!(partial.urgency, Urgency::Routine);
    assert_eq!(partial.follow_up_interval_hours, Some(48));
}

#[test]
fn grading_abstains_without_detection() {
    let module = SeverityGradingModule::new(Arc::new(StaticProtocolTable));
    assert!(module.evaluate(&ctx(None, RiskFactors::default())).is_none());
}

#[test]
fn risk_modifier_fires_only_on_compounding_factors() {
    let module = RiskModifierModule;
    let single = RiskFactors {
        diabetes: true,
        ..RiskFactors::default()
    };
    assert!(module.evaluate(&ctx(Some((2, 0.8)), single)).is_none());

    let compounding = RiskFactors {
        diabetes: true,
        immobility: true,
        ..RiskFactors::default()
    };
    let partial = module.evaluate(&ctx(Some((2, 0.8)), compounding)).unwrap();
    assert_eq!(partial.urgency, Urgency::Routine);
    assert_eq!(partial.follow_up_interval_hours, Some(12));
}

#[test]
fn follow_up_handles_only_text_cases() {
    let module = FollowUpModule;
    assert!(module.evaluate(&ctx(Some((2, 0.8)), RiskFactors::default())).is_none());
    let partial = module.evaluate(&ctx(None, RiskFactors::default())).unwrap();
    assert_eq!(partial.urgency, Urgency::Routine);
    assert_eq!(partial.evidence_level, EvidenceLevel::C);
}
