// crates/phi-gate-config/tests/boundary_validation.rs
// ============================================================================
// Module: Boundary Validation Tests
// Description: Tests for min/max boundaries and permutation checks.
// ============================================================================
//! ## Overview
//! Ensures numeric boundaries, the queue permutation rule, and the store
//! separation rule are enforced.

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

use phi_gate_config::ConfigError;

mod common;

type TestResult = Result<(), String>;

/// Assert that a validation result is an error containing a specific substring.
fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error '{message}' did not contain '{needle}'"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

// ============================================================================
// SECTION: Numeric Boundaries
// ============================================================================

#[test]
fn minimal_config_is_valid() -> TestResult {
    common::minimal_config().validate().map_err(|err| err.to_string())
}

#[test]
fn session_ttl_zero_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.session.ttl_seconds = 0;
    assert_invalid(config.validate(), "session.ttl_seconds")
}

#[test]
fn max_attempts_zero_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.task.max_attempts = 0;
    assert_invalid(config.validate(), "task.max_attempts")
}

#[test]
fn pool_size_zero_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.worker.pool_size = 0;
    assert_invalid(config.validate(), "worker.pool_size")
}

#[test]
fn prefetch_zero_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.worker.prefetch = 0;
    assert_invalid(config.validate(), "worker.prefetch")
}

#[test]
fn min_share_above_hundred_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.worker.min_share_percent = 101;
    assert_invalid(config.validate(), "worker.min_share_percent")
}

#[test]
fn confidence_threshold_at_one_accepted() -> TestResult {
    let mut config = common::minimal_config();
    config.medical.confidence_escalation_threshold = 1.0;
    config.validate().map_err(|err| err.to_string())
}

#[test]
fn confidence_threshold_zero_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.medical.confidence_escalation_threshold = 0.0;
    assert_invalid(config.validate(), "medical.confidence_escalation_threshold")
}

#[test]
fn confidence_threshold_above_one_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.medical.confidence_escalation_threshold = 1.5;
    assert_invalid(config.validate(), "medical.confidence_escalation_threshold")
}

#[test]
fn retention_days_zero_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.audit.retention_days = 0;
    assert_invalid(config.validate(), "audit.retention_days")
}

// ============================================================================
// SECTION: Structural Rules
// ============================================================================

#[test]
fn priority_order_missing_queue_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.queues.priority_order.pop();
    assert_invalid(config.validate(), "queues.priority_order")
}

#[test]
fn priority_order_duplicate_queue_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.queues.priority_order[1] = config.queues.priority_order[0].clone();
    assert_invalid(config.validate(), "queues.priority_order")
}

#[test]
fn priority_order_unknown_queue_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.queues.priority_order[0] = "express_lane".to_string();
    assert_invalid(config.validate(), "unknown queue")
}

#[test]
fn unknown_stage_deadline_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.task.deadline_seconds_by_stage.insert("teleportation".to_string(), 120);
    assert_invalid(config.validate(), "unknown stage")
}

#[test]
fn empty_alias_salt_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.tokenization.alias_vocabulary_salt.clear();
    assert_invalid(config.validate(), "alias_vocabulary_salt")
}

#[test]
fn shared_store_paths_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.stores.processing_path = config.stores.hospital_path.clone();
    assert_invalid(config.validate(), "distinct databases")
}

#[test]
fn unknown_auth_role_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.server.auth_tokens.push(phi_gate_config::BearerTokenConfig {
        token: "secret".to_string(),
        actor: "intake_gateway".to_string(),
        roles: vec!["superuser".to_string()],
    });
    assert_invalid(config.validate(), "unknown role")
}

#[test]
fn empty_auth_actor_rejected() -> TestResult {
    let mut config = common::minimal_config();
    config.server.auth_tokens.push(phi_gate_config::BearerTokenConfig {
        token: "secret".to_string(),
        actor: String::new(),
        roles: vec!["token_reader".to_string()],
    });
    assert_invalid(config.validate(), "auth_tokens")
}
