// crates/phi-gate-core/src/runtime/decision.rs
// ============================================================================
// Module: Decision Engine Facade
// Description: Merge of pluggable guideline module contributions.
// Purpose: Assemble one evidence-based decision with fail-safe escalation.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The facade computes no medical content itself. It runs every registered
//! guideline module over the decision context and merges the contributions:
//! highest urgency wins, recommendations are unioned preserving first-seen
//! order, the evidence level is the worst across contributors, and any
//! contribution below the configured confidence threshold forces escalation
//! regardless of urgency. An emergency-grade merge always escalates. Merging
//! is pure and never suspends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::decision::EvidenceLevel;
use crate::core::decision::GuidelineReference;
use crate::core::decision::MedicalDecision;
use crate::core::decision::Recommendation;
use crate::core::time::Timestamp;
use crate::core::triage::Urgency;
use crate::interfaces::DecisionContext;
use crate::interfaces::DecisionModule;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Follow-up interval in hours applied when no module proposes one.
const fn default_follow_up_hours(urgency: Urgency) -> u32 {
    match urgency {
        Urgency::Routine => 72,
        Urgency::Urgent => 24,
        Urgency::Emergency => 4,
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the decision engine facade.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum DecisionEngineError {
    /// Every registered module abstained; the facade fails closed.
    #[error("no guideline module contributed a decision")]
    NoContribution,
}

// ============================================================================
// SECTION: Facade
// ============================================================================

/// Merged evaluation result.
///
/// # Invariants
/// - `low_confidence` is true exactly when some contributing module reported
///   confidence below the configured threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    /// Assembled decision.
    pub decision: MedicalDecision,
    /// Whether a contribution fell below the confidence threshold.
    pub low_confidence: bool,
}

/// Decision engine facade over pluggable guideline modules.
///
/// # Invariants
/// - Modules are evaluated in registration order; merge results are
///   deterministic for a fixed module list and context.
pub struct DecisionEngine {
    /// Registered guideline modules, in evaluation order.
    modules: Vec<Box<dyn DecisionModule>>,
    /// Confidence below which escalation is forced.
    confidence_escalation_threshold: f64,
}

impl DecisionEngine {
    /// Creates a facade over the given modules and confidence threshold.
    #[must_use]
    pub fn new(modules: Vec<Box<dyn DecisionModule>>, confidence_escalation_threshold: f64) -> Self {
        Self {
            modules,
            confidence_escalation_threshold,
        }
    }

    /// Returns the number of registered modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Evaluates every module and merges the contributions.
    ///
    /// # Errors
    ///
    /// Returns [`DecisionEngineError::NoContribution`] when all modules
    /// abstain; an empty decision is never fabricated.
    pub fn evaluate(
        &self,
        ctx: &DecisionContext,
        now: Timestamp,
    ) -> Result<DecisionOutcome, DecisionEngineError> {
        let mut urgency: Option<Urgency> = None;
        let mut evidence: Option<EvidenceLevel> = None;
        let mut recommendations: Vec<Recommendation> = Vec::new();
        let mut references: Vec<GuidelineReference> = Vec::new();
        let mut follow_up: Option<u32> = None;
        let mut justification_parts: Vec<String> = Vec::new();
        let mut low_confidence = false;

        for module in &self.modules {
            let Some(partial) = module.evaluate(ctx) else {
                continue;
            };

            urgency = Some(urgency.map_or(partial.urgency, |seen| seen.max(partial.urgency)));
            evidence = Some(
                evidence.map_or(partial.evidence_level, |seen| seen.worst(partial.evidence_level)),
            );
            if partial.confidence < self.confidence_escalation_threshold {
                low_confidence = true;
            }
            for candidate in partial.recommendations {
                if !recommendations.iter().any(|seen| seen.code == candidate.code) {
                    recommendations.push(candidate);
                }
            }
            for citation in partial.references {
                if !references.contains(&citation) {
                    references.push(citation);
                }
            }
            if let Some(hours) = partial.follow_up_interval_hours {
                follow_up = Some(follow_up.map_or(hours, |seen| seen.min(hours)));
            }
            if !partial.justification.is_empty() {
                justification_parts.push(format!("{}: {}", module.name(), partial.justification));
            }
        }

        let (Some(urgency_level), Some(evidence_level)) = (urgency, evidence) else {
            return Err(DecisionEngineError::NoContribution);
        };

        let escalation_required = low_confidence || urgency_level == Urgency::Emergency;
        let decision = MedicalDecision {
            token_id: ctx.patient.token_id.clone(),
            urgency_level,
            evidence_level,
            recommendations,
            references,
            escalation_required,
            follow_up_interval_hours: follow_up
                .unwrap_or_else(|| default_follow_up_hours(urgency_level)),
            justification_text: justification_parts.join("; "),
            decided_at: now,
        };

        Ok(DecisionOutcome {
            decision,
            low_confidence,
        })
    }
}
