// crates/phi-gate-config/tests/load_validation.rs
// ============================================================================
// Module: Config Load Tests
// Description: Tests for TOML loading, defaults, and parse failures.
// ============================================================================
//! ## Overview
//! Validates that a minimal TOML file loads with documented defaults and
//! that malformed files fail with parse errors.

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

use std::io::Write;

use phi_gate_config::ConfigError;
use phi_gate_config::GateConfig;

mod common;

/// Minimal TOML exercising defaults for every optional section.
const MINIMAL_TOML: &str = r#"
[input_queue]
path = "/var/lib/phi-gate/input-queue.db"
sender_salt = "file-test-sender-salt"

[tokenization]
alias_vocabulary_salt = "file-test-salt"

[stores]
hospital_path = "/var/lib/phi-gate/hospital.db"
processing_path = "/var/lib/phi-gate/processing.db"
audit_path = "/var/lib/phi-gate/audit.db"
"#;

#[test]
fn minimal_toml_loads_with_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MINIMAL_TOML.as_bytes()).unwrap();
    let config = GateConfig::load(file.path()).unwrap();
    assert_eq!(config.session.ttl_seconds, 900);
    assert_eq!(config.input_queue.deadline_seconds, 900);
    assert_eq!(config.task.max_attempts, 3);
    assert_eq!(config.task.retry_delay_base_seconds, 60);
    assert_eq!(config.worker.pool_size, 4);
    assert_eq!(config.worker.prefetch, 1);
    assert_eq!(config.tokenization.reconciliation_grace_seconds, 300);
    assert_eq!(config.audit.retention_days, 2_555);
    assert!((config.medical.confidence_escalation_threshold - 0.60).abs() < f64::EPSILON);
    assert_eq!(
        config.queues.priority_order,
        vec!["medical_priority", "image_processing", "notifications", "audit_logging"]
    );
}

#[test]
fn stage_deadline_defaults_are_bounded() {
    let config = common::minimal_config();
    for deadline in config.task.deadline_seconds_by_stage.values() {
        assert!((180..=300).contains(deadline));
    }
}

#[test]
fn malformed_toml_fails_with_parse_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"[input_queue\npath = 3").unwrap();
    match GateConfig::load(file.path()) {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected parse error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn missing_file_fails_with_io_error() {
    let missing = std::path::Path::new("/nonexistent/phi-gate/config.toml");
    match GateConfig::load(missing) {
        Err(ConfigError::Io(_)) => {}
        other => panic!("expected io error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn invalid_values_fail_validation_on_load() {
    let toml = MINIMAL_TOML.replace(
        "[tokenization]\nalias_vocabulary_salt = \"file-test-salt\"",
        "[tokenization]\nalias_vocabulary_salt = \"\"",
    );
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    match GateConfig::load(file.path()) {
        Err(ConfigError::Invalid(message)) => {
            assert!(message.contains("alias_vocabulary_salt"));
        }
        other => panic!("expected invalid error, got {:?}", other.map(|_| ())),
    }
}
