// crates/phi-gate-config/tests/common/mod.rs
// ============================================================================
// Module: Config Test Helpers
// Description: Shared builders for configuration tests.
// ============================================================================
//! ## Overview
//! Provides a minimal valid configuration for mutation-based tests.

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
    dead_code,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::path::PathBuf;

use phi_gate_config::AuditConfig;
use phi_gate_config::DetectorConfig;
use phi_gate_config::GateConfig;
use phi_gate_config::InputQueueConfig;
use phi_gate_config::MedicalConfig;
use phi_gate_config::NotifierConfig;
use phi_gate_config::QueuesConfig;
use phi_gate_config::ServerConfig;
use phi_gate_config::SessionConfig;
use phi_gate_config::StoresConfig;
use phi_gate_config::TaskConfig;
use phi_gate_config::TokenizationConfig;
use phi_gate_config::WorkerConfig;

/// Returns a minimal configuration that passes validation.
pub fn minimal_config() -> GateConfig {
    GateConfig {
        session: SessionConfig::default(),
        input_queue: InputQueueConfig {
            path: PathBuf::from("/var/lib/phi-gate/input-queue.db"),
            sender_salt: "unit-test-sender-salt".to_string(),
            deadline_seconds: 900,
            lease_seconds: 60,
            max_media_bytes: 25 * 1024 * 1024,
        },
        task: TaskConfig::default(),
        worker: WorkerConfig::default(),
        queues: QueuesConfig::default(),
        tokenization: TokenizationConfig {
            alias_vocabulary_salt: "unit-test-salt".to_string(),
            reconciliation_grace_seconds: 300,
            default_token_ttl_seconds: 86_400,
        },
        audit: AuditConfig::default(),
        medical: MedicalConfig::default(),
        stores: StoresConfig {
            hospital_path: PathBuf::from("/var/lib/phi-gate/hospital.db"),
            processing_path: PathBuf::from("/var/lib/phi-gate/processing.db"),
            audit_path: PathBuf::from("/var/lib/phi-gate/audit.db"),
        },
        server: ServerConfig::default(),
        detector: DetectorConfig::default(),
        notifier: NotifierConfig::default(),
    }
}
