// crates/phi-gate-runtime/tests/dispatcher_unit.rs
// ============================================================================
// Module: Dispatcher Degradation Tests
// Description: Fatal-fault handling and degraded-token refusal tests.
// ============================================================================
//! ## Overview
//! Validates that an unreconcilable store fault marks the token degraded
//! with a critical audit entry, that the failed entry is redelivered (not
//! mistaken for a duplicate), and that new work for the token is refused
//! until operator intervention.

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

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use phi_gate_core::AdapterError;
use phi_gate_core::AuditLog;
use phi_gate_core::CancelSignal;
use phi_gate_core::Clock;
use phi_gate_core::EventId;
use phi_gate_core::LppDetection;
use phi_gate_core::ManualClock;
use phi_gate_core::MedicalDecision;
use phi_gate_core::MedicalImage;
use phi_gate_core::ProcessingStore;
use phi_gate_core::SessionId;
use phi_gate_core::SessionRecord;
use phi_gate_core::StoreError;
use phi_gate_core::TaskSpec;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::TriageRules;
use phi_gate_queue::InputQueue;
use phi_gate_queue::Packager;
use phi_gate_queue::QueueKeyHolder;
use phi_gate_queue::RawInboundEvent;
use phi_gate_runtime::Dispatcher;
use phi_gate_runtime::InMemoryTokenDirectory;
use phi_gate_runtime::RunnerConfig;
use phi_gate_runtime::SessionManager;
use phi_gate_runtime::StageExecutor;
use phi_gate_runtime::StageOutput;
use phi_gate_runtime::TaskFactory;
use phi_gate_runtime::TaskRunner;
use phi_gate_store_sqlite::SqliteAuditLog;

// ============================================================================
// SECTION: Stubs
// ============================================================================

/// Processing store whose case lookup reports unrecoverable corruption.
struct CorruptCaseStore;

impl ProcessingStore for CorruptCaseStore {
    fn upsert_tokenized_patient(&self, _projection: &TokenizedPatient) -> Result<(), StoreError> {
        Ok(())
    }

    fn tokenized_patient(&self, _token: &TokenId) -> Result<Option<TokenizedPatient>, StoreError> {
        Ok(None)
    }

    fn insert_image(&self, _image: &MedicalImage) -> Result<(), StoreError> {
        Ok(())
    }

    fn insert_detection(&self, _detection: &LppDetection) -> Result<(), StoreError> {
        Ok(())
    }

    fn insert_decision(&self, _decision: &MedicalDecision) -> Result<(), StoreError> {
        Ok(())
    }

    fn open_high_grade_case(&self, _token: &TokenId) -> Result<bool, StoreError> {
        Err(StoreError::Corrupt("detection index unreadable".to_string()))
    }

    fn upsert_session(&self, _session: &SessionRecord) -> Result<(), StoreError> {
        Ok(())
    }

    fn session(&self, _session: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(None)
    }

    fn latest_session_for_token(
        &self,
        _token: &TokenId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        Ok(None)
    }
}

/// Executor that must never run in these tests.
struct UnreachableExecutor;

#[async_trait]
impl StageExecutor for UnreachableExecutor {
    async fn execute(
        &self,
        _task: &TaskSpec,
        _cancel: &CancelSignal,
    ) -> Result<StageOutput, AdapterError> {
        Err(AdapterError::non_retryable("no stage should execute"))
    }
}

// ============================================================================
// SECTION: Test
// ============================================================================

const LEASE_MS: u64 = 60_000;

#[tokio::test(flavor = "multi_thread")]
async fn fatal_store_fault_degrades_the_token_until_restored() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_700_000_000_000)));
    let processing: Arc<dyn ProcessingStore> = Arc::new(CorruptCaseStore);
    let packager = Packager::new(*b"dispatcher-test-sender-salt-----", 1024);
    let queue = Arc::new(
        InputQueue::open(
            &dir.path().join("queue.db"),
            Arc::new(QueueKeyHolder::generate()),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            900_000,
            LEASE_MS,
        )
        .unwrap(),
    );
    let sessions = Arc::new(SessionManager::new(
        Arc::clone(&processing),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        900_000,
    ));
    let runner = TaskRunner::new(
        Arc::new(UnreachableExecutor),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        RunnerConfig::default(),
    );
    let factory = TaskFactory::new(3, 0, BTreeMap::new(), Arc::clone(&clock) as Arc<dyn Clock>);
    let token = TokenId::new("00112233445566778899aabbccddeeff");
    let directory = Arc::new(InMemoryTokenDirectory::new());
    directory.register(packager.source_id("sender-a"), token.clone());
    let dispatcher = Dispatcher::new(
        Arc::clone(&queue),
        directory,
        sessions,
        Arc::clone(&processing),
        runner,
        factory,
        TriageRules::default(),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );

    let event = RawInboundEvent {
        event_id: EventId::new("evt-1"),
        sender: "sender-a".to_string(),
        text: Some("hello".to_string()),
        media: Vec::new(),
    };
    let package = packager.package(&event, clock.now()).unwrap();
    queue.enqueue(&package).unwrap();

    // First delivery hits the unreconcilable fault.
    assert!(dispatcher.run_once().await.is_err());
    let actions: Vec<String> = audit
        .entries_for_token(&token)
        .unwrap()
        .into_iter()
        .map(|entry| entry.record.action.as_str().to_string())
        .collect();
    assert!(actions.contains(&"component_degraded".to_string()));

    // The entry is redelivered after the lease lapses and is refused as
    // degraded work, not misread as a duplicate.
    clock.advance_millis(LEASE_MS);
    assert!(dispatcher.run_once().await.unwrap());
    let entries = audit.entries_for_token(&token).unwrap();
    let rejected = entries.iter().any(|entry| {
        entry.record.action.as_str() == "input_rejected"
            && entry.record.detail.as_deref() == Some("token_degraded")
    });
    assert!(rejected);
    assert_eq!(queue.depth().unwrap(), 0);

    // Operator intervention restores the token.
    dispatcher.restore_token(&token);
    let second = RawInboundEvent {
        event_id: EventId::new("evt-2"),
        sender: "sender-a".to_string(),
        text: Some("hello again".to_string()),
        media: Vec::new(),
    };
    let second_package = packager.package(&second, clock.now()).unwrap();
    queue.enqueue(&second_package).unwrap();
    // The store is still corrupt, so processing fails again, proving the
    // refusal came from the degraded mark rather than a permanent state.
    assert!(dispatcher.run_once().await.is_err());
}
