// crates/phi-gate-core/src/runtime/triage.rs
// ============================================================================
// Module: Triage Engine
// Description: Deterministic urgency classification over packaged input.
// Purpose: Route inputs by clinical urgency using a closed rule set only.
// Dependencies: crate::core::{input, session, time, triage}
// ============================================================================

//! ## Overview
//! The triage engine is a pure function over an input package and a session
//! context: identical inputs produce identical decisions. It evaluates a
//! closed rule set (coded keyword triggers, repeat-submission timing) plus
//! numeric thresholds over content-agnostic signals (media count and size).
//! The engine reads no patient identity and makes no network calls. When the
//! rules cannot classify an input decisively it fails toward safety:
//! `urgency=urgent, route=human_review`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use crate::core::input::InputPackage;
use crate::core::input::InputType;
use crate::core::session::SessionSnapshot;
use crate::core::time::Timestamp;
use crate::core::triage::ReasonCode;
use crate::core::triage::TriageDecision;
use crate::core::triage::TriageRoute;
use crate::core::triage::Urgency;

// ============================================================================
// SECTION: Rule Set
// ============================================================================

/// Closed triage rule set.
///
/// # Invariants
/// - Keyword sets are closed vocabularies; matching is case-insensitive
///   substring search over the package text.
/// - Thresholds apply to content-agnostic signals only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageRules {
    /// Coded keywords that grade an input as an emergency.
    pub emergency_keywords: BTreeSet<String>,
    /// Coded keywords that, combined with media, report explicit pain.
    pub pain_keywords: BTreeSet<String>,
    /// Media count at or above which the input grades urgent.
    pub media_count_urgent_threshold: usize,
    /// Aggregate media bytes at or above which the input grades urgent.
    pub media_bytes_urgent_threshold: u64,
    /// Window after the previous submission in which a repeat of an open
    /// high-grade case grades urgent, in milliseconds.
    pub repeat_window_ms: u64,
}

impl Default for TriageRules {
    fn default() -> Self {
        Self {
            emergency_keywords: [
                "bleeding",
                "fever",
                "sepsis",
                "black tissue",
                "foul odor",
                "exposed bone",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            pain_keywords: ["pain", "painful", "aching", "burning"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            media_count_urgent_threshold: 3,
            media_bytes_urgent_threshold: 50 * 1024 * 1024,
            repeat_window_ms: 24 * 60 * 60 * 1_000,
        }
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Session-derived context supplied by the Dispatcher.
///
/// # Invariants
/// - Values are snapshots read before evaluation; the engine performs no
///   lookups of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriageContext {
    /// Snapshot of the session the input belongs to.
    pub session: SessionSnapshot,
    /// Whether the token has an open high-grade (3-4) case.
    pub open_high_grade_case: bool,
    /// Instant of the previous submission for this token, when one exists.
    pub previous_submission_at: Option<Timestamp>,
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Evaluates the closed rule set over one packaged input.
///
/// Rules fire in a fixed order; the first terminal rule decides the route
/// and every fired reason code is reported in evaluation order.
#[must_use]
pub fn evaluate(
    rules: &TriageRules,
    package: &InputPackage,
    ctx: &TriageContext,
    now: Timestamp,
) -> TriageDecision {
    if !ctx.session.state.is_active() {
        return TriageDecision {
            urgency: Urgency::Routine,
            route: TriageRoute::Reject,
            reason_codes: vec![ReasonCode::SessionNotActive],
        };
    }

    if package.text.as_deref().is_none_or(str::is_empty) && package.media.is_empty() {
        return TriageDecision {
            urgency: Urgency::Routine,
            route: TriageRoute::Reject,
            reason_codes: vec![ReasonCode::EmptyInput],
        };
    }

    let lowered_text = package.text.as_deref().unwrap_or_default().to_lowercase();
    let mut reason_codes = Vec::new();
    let mut urgency = Urgency::Routine;

    if contains_any(&lowered_text, &rules.emergency_keywords) {
        reason_codes.push(ReasonCode::EmergencyKeyword);
        urgency = Urgency::Emergency;
    }

    if package.input_type.has_media() && contains_any(&lowered_text, &rules.pain_keywords) {
        reason_codes.push(ReasonCode::ImageWithPainReport);
        urgency = urgency.max(Urgency::Urgent);
    }

    if ctx.open_high_grade_case
        && let Some(previous) = ctx.previous_submission_at
        && now.millis_since(previous) <= rules.repeat_window_ms
    {
        reason_codes.push(ReasonCode::RepeatOfHighGradeCase);
        urgency = urgency.max(Urgency::Urgent);
    }

    if package.media_count() >= rules.media_count_urgent_threshold
        || package.media_bytes() >= rules.media_bytes_urgent_threshold
    {
        reason_codes.push(ReasonCode::HighMediaVolume);
        urgency = urgency.max(Urgency::Urgent);
    }

    // Video is not classifiable by the detection stage; send it to a human.
    if matches!(package.input_type, InputType::Video) {
        reason_codes.push(ReasonCode::Uncertain);
        return TriageDecision {
            urgency: urgency.max(Urgency::Urgent),
            route: TriageRoute::HumanReview,
            reason_codes,
        };
    }

    if reason_codes.is_empty() {
        reason_codes.push(ReasonCode::NoTrigger);
    }

    TriageDecision {
        urgency,
        route: TriageRoute::ClinicalProcessing,
        reason_codes,
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Case-insensitive closed-vocabulary match.
fn contains_any(lowered_text: &str, keywords: &BTreeSet<String>) -> bool {
    !lowered_text.is_empty() && keywords.iter().any(|keyword| lowered_text.contains(keyword))
}
