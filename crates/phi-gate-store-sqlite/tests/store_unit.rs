// crates/phi-gate-store-sqlite/tests/store_unit.rs
// ============================================================================
// Module: SQLite Store Tests
// Description: Round-trip, idempotency, and PHI-separation tests.
// ============================================================================
//! ## Overview
//! Validates record round-trips per store, idempotent upserts, audit
//! append-order, and the invariant that no Processing Store row carries a
//! hospital identity value.

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

use phi_gate_core::ActorId;
use phi_gate_core::AgeRange;
use phi_gate_core::AnatomicalLocation;
use phi_gate_core::ApprovalStatus;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::Component;
use phi_gate_core::CorrelationId;
use phi_gate_core::GenderCategory;
use phi_gate_core::HospitalMrn;
use phi_gate_core::HospitalPatient;
use phi_gate_core::HospitalStore;
use phi_gate_core::InputType;
use phi_gate_core::LppDetection;
use phi_gate_core::LppGrade;
use phi_gate_core::PatientId;
use phi_gate_core::ProcessingStore;
use phi_gate_core::RequestId;
use phi_gate_core::RiskFactors;
use phi_gate_core::SessionId;
use phi_gate_core::SessionRecord;
use phi_gate_core::SessionState;
use phi_gate_core::StoreError;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizationRequest;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::scan_text;
use phi_gate_store_sqlite::SqliteAuditLog;
use phi_gate_store_sqlite::SqliteHospitalStore;
use phi_gate_store_sqlite::SqliteProcessingStore;

// ============================================================================
// SECTION: Test Helpers
// ============================================================================

const TOKEN: &str = "0123456789abcdef0123456789abcdef";

fn hospital_store() -> (tempfile::TempDir, SqliteHospitalStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteHospitalStore::open(&dir.path().join("hospital.db")).unwrap();
    (dir, store)
}

fn processing_store() -> (tempfile::TempDir, SqliteProcessingStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteProcessingStore::open(&dir.path().join("processing.db")).unwrap();
    (dir, store)
}

fn patient() -> HospitalPatient {
    HospitalPatient {
        patient_id: PatientId::new("pat-1"),
        hospital_mrn: HospitalMrn::new("MRN-445566"),
        full_name: "Bruce Wayne".to_string(),
        date_of_birth: "1972-02-19".to_string(),
        phone_number: "+1-555-0100".to_string(),
        chronic_conditions: BTreeSet::from(["E11.9".to_string(), "I10".to_string()]),
        attending_physician: "Dr. Thompkins".to_string(),
        ward_location: "W-4".to_string(),
    }
}

fn request(status: ApprovalStatus) -> TokenizationRequest {
    TokenizationRequest {
        request_id: RequestId::new("req-1"),
        patient_id: PatientId::new("pat-1"),
        token_id: TokenId::new(TOKEN),
        token_alias: TokenAlias::new("Batman"),
        requesting_system: "whatsapp_intake".to_string(),
        approval_status: status,
        expires_at: Timestamp::from_unix_millis(2_000_000),
        created_at: Timestamp::from_unix_millis(1_000),
    }
}

fn projection() -> TokenizedPatient {
    TokenizedPatient {
        token_id: TokenId::new(TOKEN),
        patient_alias: TokenAlias::new("Batman"),
        age_range: AgeRange::MiddleAged,
        gender_category: GenderCategory::Male,
        risk_factors: RiskFactors {
            diabetes: true,
            ..RiskFactors::default()
        },
        medical_conditions: BTreeSet::from(["E11.9".to_string()]),
        token_expires_at: Timestamp::from_unix_millis(2_000_000),
    }
}

fn session() -> SessionRecord {
    SessionRecord {
        session_id: SessionId::new("sess-1"),
        token_id: TokenId::new(TOKEN),
        created_at: Timestamp::from_unix_millis(5_000),
        last_touched_at: Timestamp::from_unix_millis(5_000),
        state: SessionState::Active,
        input_type: InputType::Text,
        audit_trail_id: CorrelationId::new("corr-1"),
        outcome: None,
    }
}

fn audit_record(action: AuditAction, at: i64) -> AuditRecord {
    AuditRecord {
        timestamp: Timestamp::from_unix_millis(at),
        actor_id: ActorId::new("dispatcher"),
        token_id: Some(TokenId::new(TOKEN)),
        action,
        component: Component::Dispatcher,
        outcome: AuditOutcome::Ok,
        correlation_id: CorrelationId::new("corr-1"),
        detail: None,
    }
}

// ============================================================================
// SECTION: Hospital Store
// ============================================================================

#[test]
fn patient_round_trips_by_mrn_and_id() {
    let (_dir, store) = hospital_store();
    store.insert_patient(&patient()).unwrap();
    let by_mrn = store.patient_by_mrn(&HospitalMrn::new("MRN-445566")).unwrap().unwrap();
    assert_eq!(by_mrn, patient());
    let by_id = store.patient_by_id(&PatientId::new("pat-1")).unwrap().unwrap();
    assert_eq!(by_id, patient());
}

#[test]
fn duplicate_mrn_is_a_constraint_error() {
    let (_dir, store) = hospital_store();
    store.insert_patient(&patient()).unwrap();
    let mut duplicate = patient();
    duplicate.patient_id = PatientId::new("pat-2");
    match store.insert_patient(&duplicate) {
        Err(StoreError::Constraint(_)) => {}
        other => panic!("expected constraint error, got {:?}", other.map(|()| ())),
    }
}

#[test]
fn request_insert_is_idempotent_by_token() {
    let (_dir, store) = hospital_store();
    store.insert_patient(&patient()).unwrap();
    store.insert_request(&request(ApprovalStatus::Pending)).unwrap();
    store.insert_request(&request(ApprovalStatus::Pending)).unwrap();
    let fetched = store.request_by_token(&TokenId::new(TOKEN)).unwrap().unwrap();
    assert_eq!(fetched.approval_status, ApprovalStatus::Pending);
}

#[test]
fn active_request_requires_approved_and_unexpired() {
    let (_dir, store) = hospital_store();
    store.insert_patient(&patient()).unwrap();
    store.insert_request(&request(ApprovalStatus::Pending)).unwrap();
    let pair = (PatientId::new("pat-1"), "whatsapp_intake");
    let now = Timestamp::from_unix_millis(10_000);
    assert!(store.active_request(&pair.0, pair.1, now).unwrap().is_none());

    store
        .update_request_status(&TokenId::new(TOKEN), ApprovalStatus::Approved)
        .unwrap();
    assert!(store.active_request(&pair.0, pair.1, now).unwrap().is_some());

    let past_expiry = Timestamp::from_unix_millis(2_000_001);
    assert!(store.active_request(&pair.0, pair.1, past_expiry).unwrap().is_none());
}

#[test]
fn pending_sweep_sees_only_old_pending_requests() {
    let (_dir, store) = hospital_store();
    store.insert_patient(&patient()).unwrap();
    store.insert_request(&request(ApprovalStatus::Pending)).unwrap();
    let cutoff = Timestamp::from_unix_millis(1_000);
    assert_eq!(store.pending_requests_before(cutoff).unwrap().len(), 1);
    assert!(
        store
            .pending_requests_before(Timestamp::from_unix_millis(999))
            .unwrap()
            .is_empty()
    );
}

// ============================================================================
// SECTION: Processing Store
// ============================================================================

#[test]
fn projection_upsert_round_trips_and_is_idempotent() {
    let (_dir, store) = processing_store();
    store.upsert_tokenized_patient(&projection()).unwrap();
    store.upsert_tokenized_patient(&projection()).unwrap();
    let fetched = store.tokenized_patient(&TokenId::new(TOKEN)).unwrap().unwrap();
    assert_eq!(fetched, projection());
}

#[test]
fn session_round_trips_with_state_updates() {
    let (_dir, store) = processing_store();
    store.upsert_session(&session()).unwrap();
    let mut touched = session();
    touched.last_touched_at = Timestamp::from_unix_millis(9_000);
    store.upsert_session(&touched).unwrap();
    let fetched = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    assert_eq!(fetched.last_touched_at, Timestamp::from_unix_millis(9_000));
    assert_eq!(
        store.latest_session_for_token(&TokenId::new(TOKEN)).unwrap().unwrap().session_id,
        SessionId::new("sess-1")
    );
}

#[test]
fn high_grade_case_flag_tracks_detections() {
    let (_dir, store) = processing_store();
    let token = TokenId::new(TOKEN);
    assert!(!store.open_high_grade_case(&token).unwrap());
    store
        .insert_detection(&LppDetection {
            token_id: token.clone(),
            grade: LppGrade::new(2).unwrap(),
            confidence: 0.8,
            location: AnatomicalLocation::Heel,
            model_version: "detector-1".to_string(),
            detected_at: Timestamp::from_unix_millis(1_000),
        })
        .unwrap();
    assert!(!store.open_high_grade_case(&token).unwrap());
    store
        .insert_detection(&LppDetection {
            token_id: token.clone(),
            grade: LppGrade::new(3).unwrap(),
            confidence: 0.9,
            location: AnatomicalLocation::Sacrum,
            model_version: "detector-1".to_string(),
            detected_at: Timestamp::from_unix_millis(2_000),
        })
        .unwrap();
    assert!(store.open_high_grade_case(&token).unwrap());
    let detections = store.detections_for_token(&token).unwrap();
    assert_eq!(detections.len(), 2);
    assert!(detections[1].grade.is_high_grade());
}

#[test]
fn no_processing_row_contains_hospital_identity_values() {
    let (_dir, store) = processing_store();
    store.upsert_tokenized_patient(&projection()).unwrap();
    store.upsert_session(&session()).unwrap();
    let record = patient();

    let fetched = store.tokenized_patient(&TokenId::new(TOKEN)).unwrap().unwrap();
    let rendered = serde_json::to_string(&fetched).unwrap();
    assert_eq!(scan_text(&record, &rendered), None);

    let fetched_session = store.session(&SessionId::new("sess-1")).unwrap().unwrap();
    let rendered_session = serde_json::to_string(&fetched_session).unwrap();
    assert_eq!(scan_text(&record, &rendered_session), None);
}

// ============================================================================
// SECTION: Audit Log
// ============================================================================

#[test]
fn audit_entries_are_monotonic_and_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let log = SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap();
    let first = log.append(&audit_record(AuditAction::InputReceived, 1_000)).unwrap();
    let second = log.append(&audit_record(AuditAction::SessionCreated, 2_000)).unwrap();
    assert!(second > first);

    let entries = log.entries_for_token(&TokenId::new(TOKEN)).unwrap();
    let actions: Vec<&str> =
        entries.iter().map(|entry| entry.record.action.as_str()).collect();
    assert_eq!(actions, vec!["input_received", "session_created"]);
}

#[test]
fn audit_range_read_is_closed_on_both_ends() {
    let dir = tempfile::tempdir().unwrap();
    let log = SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap();
    log.append(&audit_record(AuditAction::InputReceived, 1_000)).unwrap();
    log.append(&audit_record(AuditAction::SessionCreated, 2_000)).unwrap();
    log.append(&audit_record(AuditAction::SessionClosed, 3_000)).unwrap();
    let entries = log
        .entries_in_range(Timestamp::from_unix_millis(1_000), Timestamp::from_unix_millis(2_000))
        .unwrap();
    assert_eq!(entries.len(), 2);
}

#[test]
fn retention_prune_removes_only_entries_past_the_cutoff() {
    let dir = tempfile::tempdir().unwrap();
    let log = SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap();
    log.append(&audit_record(AuditAction::InputReceived, 1_000)).unwrap();
    log.append(&audit_record(AuditAction::SessionCreated, 5_000)).unwrap();
    let removed = log.prune_older_than(Timestamp::from_unix_millis(2_000)).unwrap();
    assert_eq!(removed, 1);
    let remaining = log.entries_for_token(&TokenId::new(TOKEN)).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].record.action.as_str(), "session_created");
}
