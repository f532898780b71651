// crates/phi-gate-runtime/tests/session_unit.rs
// ============================================================================
// Module: Session Manager Tests
// Description: Lifecycle, TTL boundary, race, and cancellation tests.
// ============================================================================
//! ## Overview
//! Validates the session lifecycle against a manual clock: inclusive TTL
//! expiry, close-beats-touch, non-revivable expiry, sweep audits, and
//! cancellation fan-out to derived task scopes.

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

use std::sync::Arc;

use phi_gate_core::AuditLog;
use phi_gate_core::Clock;
use phi_gate_core::CorrelationId;
use phi_gate_core::InputType;
use phi_gate_core::ManualClock;
use phi_gate_core::ProcessingStore;
use phi_gate_core::SessionOutcome;
use phi_gate_core::SessionState;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenId;
use phi_gate_runtime::SessionError;
use phi_gate_runtime::SessionManager;
use phi_gate_store_sqlite::SqliteAuditLog;
use phi_gate_store_sqlite::SqliteProcessingStore;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const TTL_MS: u64 = 900_000;

struct Fixture {
    _dir: tempfile::TempDir,
    manager: Arc<SessionManager>,
    processing: Arc<SqliteProcessingStore>,
    audit: Arc<SqliteAuditLog>,
    clock: Arc<ManualClock>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let processing =
            Arc::new(SqliteProcessingStore::open(&dir.path().join("processing.db")).unwrap());
        let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap());
        let clock =
            Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_700_000_000_000)));
        let manager = Arc::new(SessionManager::new(
            Arc::clone(&processing) as Arc<dyn ProcessingStore>,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            TTL_MS,
        ));
        Self {
            _dir: dir,
            manager,
            processing,
            audit,
            clock,
        }
    }

    fn token(&self) -> TokenId {
        TokenId::new("0123456789abcdef0123456789abcdef")
    }

    fn create(&self) -> phi_gate_core::SessionSnapshot {
        self.manager
            .create(self.token(), InputType::Text, CorrelationId::new("corr-1"))
            .unwrap()
    }
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

#[test]
fn create_mirrors_to_the_store_and_audits() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    let stored = fixture.processing.session(&snapshot.session_id).unwrap().unwrap();
    assert_eq!(stored.state, SessionState::Active);

    let entries = fixture.audit.entries_for_token(&fixture.token()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].record.action.as_str(), "session_created");
}

#[test]
fn touch_resets_the_idle_clock() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    fixture.clock.advance_millis(TTL_MS - 1);
    fixture.manager.touch(&snapshot.session_id).unwrap();
    fixture.clock.advance_millis(TTL_MS - 1);
    // Still active: the second interval measures from the touch.
    assert_eq!(
        fixture.manager.snapshot(&snapshot.session_id).unwrap().state,
        SessionState::Active
    );
}

#[test]
fn expiry_boundary_is_inclusive() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    fixture.clock.advance_millis(TTL_MS);
    // Exactly at the TTL the session is expired; the touch fails and the
    // session transitions in place.
    match fixture.manager.touch(&snapshot.session_id) {
        Err(SessionError::NotActive("expired")) => {}
        other => panic!("expected expired, got {other:?}"),
    }
    assert_eq!(
        fixture.manager.snapshot(&snapshot.session_id).unwrap().state,
        SessionState::Expired
    );
}

#[test]
fn close_finalizes_and_wins_over_touch() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    fixture.manager.close(&snapshot.session_id, SessionOutcome::Completed).unwrap();
    match fixture.manager.touch(&snapshot.session_id) {
        Err(SessionError::NotActive("closed")) => {}
        other => panic!("expected closed, got {other:?}"),
    }
    let stored = fixture.processing.session(&snapshot.session_id).unwrap().unwrap();
    assert_eq!(stored.state, SessionState::Closed);
    assert_eq!(stored.outcome, Some(SessionOutcome::Completed));
}

#[test]
fn expired_sessions_are_not_revivable() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    fixture.clock.advance_millis(TTL_MS + 1);
    let expired = fixture.manager.sweep().unwrap();
    assert_eq!(expired.len(), 1);
    match fixture.manager.close(&snapshot.session_id, SessionOutcome::Completed) {
        Err(SessionError::NotActive("expired")) => {}
        other => panic!("expected expired, got {other:?}"),
    }
}

// ============================================================================
// SECTION: Sweep and Cancellation
// ============================================================================

#[test]
fn sweep_expires_audits_and_cancels_task_scopes() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    let scope = fixture.manager.cancel_scope(&snapshot.session_id).unwrap();
    assert!(!scope.is_canceled());

    fixture.clock.advance_millis(TTL_MS);
    let expired = fixture.manager.sweep().unwrap();
    assert_eq!(expired.len(), 1);
    assert!(scope.is_canceled());

    let entries = fixture.audit.entries_for_token(&fixture.token()).unwrap();
    let actions: Vec<&str> = entries.iter().map(|entry| entry.record.action.as_str()).collect();
    assert_eq!(actions, vec!["session_created", "session_expired"]);

    // Sweep is idempotent: an expired session is not expired twice.
    assert!(fixture.manager.sweep().unwrap().is_empty());
}

#[test]
fn close_cancels_task_scopes() {
    let fixture = Fixture::new();
    let snapshot = fixture.create();
    let scope = fixture.manager.cancel_scope(&snapshot.session_id).unwrap();
    fixture.manager.close(&snapshot.session_id, SessionOutcome::HumanReview).unwrap();
    assert!(scope.is_canceled());
}

#[test]
fn sessions_are_independent() {
    let fixture = Fixture::new();
    let first = fixture.create();
    fixture.clock.advance_millis(TTL_MS / 2);
    let second = fixture.create();

    fixture.clock.advance_millis(TTL_MS / 2);
    let expired = fixture.manager.sweep().unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].session_id, first.session_id);
    assert_eq!(
        fixture.manager.snapshot(&second.session_id).unwrap().state,
        SessionState::Active
    );
}
