// crates/phi-gate-adapters/src/guidelines.rs
// ============================================================================
// Module: Guideline Modules
// Description: Evidence-based decision modules behind the facade interface.
// Purpose: Turn detections and risk projections into partial decisions.
// Dependencies: phi-gate-core
// ============================================================================

//! ## Overview
//! Three pluggable guideline modules: severity grading over the
//! international 0-4 pressure injury scale (evidence A), a risk-factor
//! modifier that tightens follow-up for compounding comorbidities (evidence
//! B), and a text-only follow-up module that echoes the triage urgency
//! (evidence C). Modules are pure; they never suspend and never read
//! identity. The clinical knowledge base itself is pluggable behind
//! [`ProtocolStore`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use phi_gate_core::DecisionContext;
use phi_gate_core::DecisionModule;
use phi_gate_core::EvidenceLevel;
use phi_gate_core::GuidelineReference;
use phi_gate_core::LppGrade;
use phi_gate_core::PartialDecision;
use phi_gate_core::ProtocolStore;
use phi_gate_core::Recommendation;
use phi_gate_core::Urgency;

// ============================================================================
// SECTION: Protocol Table
// ============================================================================

/// Built-in protocol table citing the international guideline set.
///
/// # Invariants
/// - Citations are static references; the table holds no patient data.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticProtocolTable;

impl ProtocolStore for StaticProtocolTable {
    fn references_for(&self, grade: LppGrade) -> Vec<GuidelineReference> {
        let section = match grade.get() {
            0 => "prevention.1",
            1 => "treatment.stage1",
            2 => "treatment.stage2",
            3 => "treatment.stage3",
            _ => "treatment.stage4",
        };
        vec![GuidelineReference {
            source: "NPUAP/EPUAP/PPPIA 2019".to_string(),
            section: section.to_string(),
        }]
    }
}

// ============================================================================
// SECTION: Severity Grading
// ============================================================================

/// Grades urgency from the detected injury severity.
///
/// # Invariants
/// - Abstains without a detection; grading text is not this module's job.
pub struct SeverityGradingModule {
    /// Protocol citations backing each grade.
    protocols: Arc<dyn ProtocolStore>,
}

impl SeverityGradingModule {
    /// Creates the module over a protocol store.
    #[must_use]
    pub fn new(protocols: Arc<dyn ProtocolStore>) -> Self {
        Self {
            protocols,
        }
    }
}

impl DecisionModule for SeverityGradingModule {
    fn name(&self) -> &'static str {
        "severity_grading"
    }

    fn evaluate(&self, ctx: &DecisionContext) -> Option<PartialDecision> {
        let detection = ctx.detection.as_ref()?;
        let grade = detection.grade;
        let (urgency, recommendations, follow_up_hours) = match grade.get() {
            0 => (
                Urgency::Routine,
                vec![recommendation("skin_surveillance", "continue routine skin checks")],
                Some(72),
            ),
            1 => (
                Urgency::Routine,
                vec![
                    recommendation("pressure_offloading", "offload the affected site"),
                    recommendation("moisture_management", "keep the site clean and dry"),
                ],
                Some(48),
            ),
            2 => (
                Urgency::Urgent,
                vec![
                    recommendation("pressure_offloading", "offload the affected site"),
                    recommendation("wound_dressing", "apply a moist wound dressing"),
                ],
                Some(24),
            ),
            _ => (
                Urgency::Emergency,
                vec![
                    recommendation("surgical_consult", "request wound-care consult today"),
                    recommendation("pressure_offloading", "offload the affected site"),
                    recommendation("infection_screen", "screen for local and systemic infection"),
                ],
                Some(4),
            ),
        };
        Some(PartialDecision {
            urgency,
            evidence_level: EvidenceLevel::A,
            confidence: detection.confidence,
            recommendations,
            references: self.protocols.references_for(grade),
            follow_up_interval_hours: follow_up_hours,
            justification: format!(
                "grade {} at {}",
                grade.get(),
                detection.location.as_str()
            ),
        })
    }
}

// ============================================================================
// SECTION: Risk Modifier
// ============================================================================

/// Count of risk factors at which follow-up tightens.
const COMPOUNDING_RISK_THRESHOLD: u8 = 2;

/// Tightens follow-up when risk factors compound.
///
/// # Invariants
/// - Never raises urgency on its own; risk factors modify pace, not grade.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskModifierModule;

impl DecisionModule for RiskModifierModule {
    fn name(&self) -> &'static str {
        "risk_modifier"
    }

    fn evaluate(&self, ctx: &DecisionContext) -> Option<PartialDecision> {
        let risk_count = ctx.patient.risk_factors.count();
        if ctx.detection.is_none() || risk_count < COMPOUNDING_RISK_THRESHOLD {
            return None;
        }
        Some(PartialDecision {
            urgency: Urgency::Routine,
            evidence_level: EvidenceLevel::B,
            confidence: 0.85,
            recommendations: vec![recommendation(
                "risk_factor_review",
                "review compounding risk factors with the care team",
            )],
            references: vec![GuidelineReference {
                source: "NPUAP/EPUAP/PPPIA 2019".to_string(),
                section: "risk_assessment.braden".to_string(),
            }],
            follow_up_interval_hours: Some(12),
            justification: format!("{risk_count} compounding risk factors"),
        })
    }
}

// ============================================================================
// SECTION: Text Follow-Up
// ============================================================================

/// Handles text-only cases by echoing the triage urgency.
///
/// # Invariants
/// - Abstains whenever a detection exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct FollowUpModule;

impl DecisionModule for FollowUpModule {
    fn name(&self) -> &'static str {
        "follow_up"
    }

    fn evaluate(&self, ctx: &DecisionContext) -> Option<PartialDecision> {
        if ctx.detection.is_some() {
            return None;
        }
        Some(PartialDecision {
            urgency: ctx.triage_urgency,
            evidence_level: EvidenceLevel::C,
            confidence: 0.9,
            recommendations: vec![recommendation(
                "clinical_follow_up",
                "answer the question through the care channel",
            )],
            references: Vec::new(),
            follow_up_interval_hours: None,
            justification: "text-only submission".to_string(),
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds one coded recommendation.
fn recommendation(code: &str, directive: &str) -> Recommendation {
    Recommendation {
        code: code.to_string(),
        directive: directive.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
