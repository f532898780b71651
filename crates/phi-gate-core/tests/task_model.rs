// crates/phi-gate-core/tests/task_model.rs
// ============================================================================
// Module: Task Model Tests
// Description: Tests for retry arithmetic and lifecycle boundaries.
// ============================================================================
//! ## Overview
//! Validates backoff doubling, jitter bounds, the attempt cap, and the
//! inclusive session TTL boundary.

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

use phi_gate_core::CorrelationId;
use phi_gate_core::InputType;
use phi_gate_core::QueueName;
use phi_gate_core::SessionId;
use phi_gate_core::SessionRecord;
use phi_gate_core::SessionState;
use phi_gate_core::Stage;
use phi_gate_core::TaskId;
use phi_gate_core::TaskSpec;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenId;
use phi_gate_core::retry_delay_ms;
use proptest::prelude::proptest;

// ============================================================================
// SECTION: Backoff
// ============================================================================

#[test]
fn backoff_doubles_per_attempt_without_jitter() {
    assert_eq!(retry_delay_ms(60_000, 1, 0), 60_000);
    assert_eq!(retry_delay_ms(60_000, 2, 0), 120_000);
    assert_eq!(retry_delay_ms(60_000, 3, 0), 240_000);
}

#[test]
fn jitter_adjusts_by_at_most_ten_percent() {
    assert_eq!(retry_delay_ms(60_000, 1, 100), 66_000);
    assert_eq!(retry_delay_ms(60_000, 1, -100), 54_000);
    // Out-of-range jitter clamps rather than amplifies.
    assert_eq!(retry_delay_ms(60_000, 1, 5_000), 66_000);
}

#[test]
fn backoff_saturates_instead_of_overflowing() {
    let delay = retry_delay_ms(u64::MAX / 2, 40, 100);
    assert_eq!(delay, u64::MAX);
}

proptest! {
    #[test]
    fn jitter_keeps_delay_within_ten_percent_envelope(
        base in 1_000_u64..10_000_000,
        attempt in 1_u32..6,
        jitter in -100_i32..=100,
    ) {
        let raw = retry_delay_ms(base, attempt, 0);
        let jittered = retry_delay_ms(base, attempt, jitter);
        let envelope = (raw / 1_000) * 100;
        assert!(jittered >= raw.saturating_sub(envelope));
        assert!(jittered <= raw.saturating_add(envelope));
    }
}

// ============================================================================
// SECTION: Attempt Cap
// ============================================================================

#[test]
fn task_retries_only_below_the_attempt_cap() {
    let mut task = TaskSpec {
        task_id: TaskId::new("task-1"),
        queue: QueueName::MedicalPriority,
        session_id: SessionId::new("sess-1"),
        token_id: TokenId::new("0123456789abcdef0123456789abcdef"),
        stage: Stage::Decision,
        payload: serde_json::Value::Null,
        attempt: 1,
        max_attempts: 3,
        retry_delay_base_ms: 60_000,
        deadline: Timestamp::from_unix_millis(1_000_000),
        correlation_id: CorrelationId::new("corr-1"),
    };
    assert!(task.can_retry());
    task.attempt = 2;
    assert!(task.can_retry());
    task.attempt = 3;
    assert!(!task.can_retry());
}

// ============================================================================
// SECTION: Stage Chain
// ============================================================================

#[test]
fn clinical_workflow_chain_is_ordered() {
    let mut chain = vec![Stage::ImagePrep];
    while let Some(next) = chain.last().copied().and_then(Stage::next_in_workflow) {
        chain.push(next);
    }
    assert_eq!(
        chain,
        vec![
            Stage::ImagePrep,
            Stage::Detection,
            Stage::Decision,
            Stage::Notification,
            Stage::AuditFinalize,
        ]
    );
}

#[test]
fn stages_map_to_their_queues() {
    assert_eq!(Stage::Detection.queue(), QueueName::ImageProcessing);
    assert_eq!(Stage::Decision.queue(), QueueName::MedicalPriority);
    assert_eq!(Stage::Notification.queue(), QueueName::Notifications);
    assert_eq!(Stage::AuditFinalize.queue(), QueueName::AuditLogging);
    assert_eq!(Stage::HumanReview.queue(), QueueName::MedicalPriority);
}

// ============================================================================
// SECTION: Session TTL Boundary
// ============================================================================

#[test]
fn session_ttl_boundary_is_inclusive() {
    let record = SessionRecord {
        session_id: SessionId::new("sess-1"),
        token_id: TokenId::new("0123456789abcdef0123456789abcdef"),
        created_at: Timestamp::from_unix_millis(0),
        last_touched_at: Timestamp::from_unix_millis(0),
        state: SessionState::Active,
        input_type: InputType::Text,
        audit_trail_id: CorrelationId::new("corr-1"),
        outcome: None,
    };
    let ttl_ms = 900_000;
    assert!(!record.ttl_elapsed(Timestamp::from_unix_millis(899_999), ttl_ms));
    assert!(record.ttl_elapsed(Timestamp::from_unix_millis(900_000), ttl_ms));
    assert!(record.ttl_elapsed(Timestamp::from_unix_millis(900_001), ttl_ms));
}
