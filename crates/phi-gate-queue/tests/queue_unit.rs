// crates/phi-gate-queue/tests/queue_unit.rs
// ============================================================================
// Module: Input Queue Tests
// Description: Packaging, encryption round-trip, leases, and expiry tests.
// ============================================================================
//! ## Overview
//! Validates packager format checks, per-source FIFO with leases, duplicate
//! absorption, deadline sweeping with audit entries, key rotation, and the
//! quarantine path for undecryptable entries.

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
use phi_gate_core::EventId;
use phi_gate_core::InputType;
use phi_gate_core::ManualClock;
use phi_gate_core::Timestamp;
use phi_gate_queue::InputQueue;
use phi_gate_queue::PackageError;
use phi_gate_queue::Packager;
use phi_gate_queue::QueueError;
use phi_gate_queue::QueueKeyHolder;
use phi_gate_queue::RawInboundEvent;
use phi_gate_queue::RawMedia;
use phi_gate_store_sqlite::SqliteAuditLog;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const DEADLINE_MS: u64 = 900_000;
const LEASE_MS: u64 = 60_000;

struct Fixture {
    _dir: tempfile::TempDir,
    queue: InputQueue,
    audit: Arc<SqliteAuditLog>,
    clock: Arc<ManualClock>,
    packager: Packager,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap());
        let clock =
            Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_700_000_000_000)));
        let queue = InputQueue::open(
            &dir.path().join("input-queue.db"),
            Arc::new(QueueKeyHolder::generate()),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            DEADLINE_MS,
            LEASE_MS,
        )
        .unwrap();
        Self {
            _dir: dir,
            queue,
            audit,
            clock,
            packager: Packager::new(*b"per-deployment-sender-salt------", 25 * 1024 * 1024),
        }
    }

    fn text_event(&self, event_id: &str, sender: &str, text: &str) -> RawInboundEvent {
        RawInboundEvent {
            event_id: EventId::new(event_id),
            sender: sender.to_string(),
            text: Some(text.to_string()),
            media: Vec::new(),
        }
    }
}

fn jpeg_media(url: &str) -> RawMedia {
    RawMedia {
        url: url.to_string(),
        content_type: "image/jpeg".to_string(),
        byte_size: 200_000,
        leading_bytes: Some(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
    }
}

// ============================================================================
// SECTION: Packager
// ============================================================================

#[test]
fn packager_pseudonymizes_and_classifies() {
    let fixture = Fixture::new();
    let event = RawInboundEvent {
        event_id: EventId::new("evt-1"),
        sender: "+1-555-0100".to_string(),
        text: Some("photo attached".to_string()),
        media: vec![jpeg_media("https://media.example/a")],
    };
    let package = fixture.packager.package(&event, fixture.clock.now()).unwrap();
    assert_eq!(package.input_type, InputType::Mixed);
    assert!(!package.source_id.as_str().contains("555"));
    assert_eq!(package.source_id, fixture.packager.source_id("+1-555-0100"));
    assert_ne!(package.source_id, fixture.packager.source_id("+1-555-0101"));
    assert!(package.session_id.is_none());
}

#[test]
fn packager_rejects_unsupported_media() {
    let fixture = Fixture::new();
    let mut media = jpeg_media("https://media.example/a");
    media.content_type = "application/pdf".to_string();
    let event = RawInboundEvent {
        event_id: EventId::new("evt-2"),
        sender: "sender".to_string(),
        text: None,
        media: vec![media],
    };
    match fixture.packager.package(&event, fixture.clock.now()) {
        Err(PackageError::UnsupportedMedia(_)) => {}
        other => panic!("expected unsupported media, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn packager_rejects_oversize_media() {
    let fixture = Fixture::new();
    let mut media = jpeg_media("https://media.example/a");
    media.byte_size = 26 * 1024 * 1024;
    let event = RawInboundEvent {
        event_id: EventId::new("evt-3"),
        sender: "sender".to_string(),
        text: None,
        media: vec![media],
    };
    match fixture.packager.package(&event, fixture.clock.now()) {
        Err(PackageError::Oversize { .. }) => {}
        other => panic!("expected oversize, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn packager_rejects_magic_mismatch() {
    let fixture = Fixture::new();
    let mut media = jpeg_media("https://media.example/a");
    media.leading_bytes = Some(vec![0x89, 0x50, 0x4E, 0x47]);
    let event = RawInboundEvent {
        event_id: EventId::new("evt-4"),
        sender: "sender".to_string(),
        text: None,
        media: vec![media],
    };
    match fixture.packager.package(&event, fixture.clock.now()) {
        Err(PackageError::MagicMismatch(_)) => {}
        other => panic!("expected magic mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn packager_rejects_empty_events() {
    let fixture = Fixture::new();
    let event = RawInboundEvent {
        event_id: EventId::new("evt-5"),
        sender: "sender".to_string(),
        text: Some(String::new()),
        media: Vec::new(),
    };
    match fixture.packager.package(&event, fixture.clock.now()) {
        Err(PackageError::Empty) => {}
        other => panic!("expected empty, got {:?}", other.map(|_| ())),
    }
}

// ============================================================================
// SECTION: Queue Round-Trip
// ============================================================================

#[test]
fn enqueue_dequeue_ack_leaves_the_queue_empty() {
    let fixture = Fixture::new();
    let event = fixture.text_event("evt-1", "sender-a", "hello");
    let package = fixture.packager.package(&event, fixture.clock.now()).unwrap();
    fixture.queue.enqueue(&package).unwrap();
    assert_eq!(fixture.queue.depth().unwrap(), 1);

    let leased = fixture.queue.dequeue().unwrap().unwrap();
    assert_eq!(leased.package, package);
    assert_eq!(leased.deadline, fixture.clock.now().saturating_add_millis(DEADLINE_MS));

    fixture.queue.ack(&package.processing_id).unwrap();
    assert_eq!(fixture.queue.depth().unwrap(), 0);
    assert!(fixture.queue.dequeue().unwrap().is_none());
}

#[test]
fn duplicate_enqueue_is_absorbed() {
    let fixture = Fixture::new();
    let event = fixture.text_event("evt-1", "sender-a", "hello");
    let package = fixture.packager.package(&event, fixture.clock.now()).unwrap();
    fixture.queue.enqueue(&package).unwrap();
    fixture.queue.enqueue(&package).unwrap();
    assert_eq!(fixture.queue.depth().unwrap(), 1);
}

#[test]
fn per_source_fifo_holds_later_entries_while_one_is_leased() {
    let fixture = Fixture::new();
    let first = fixture
        .packager
        .package(&fixture.text_event("evt-1", "sender-a", "first"), fixture.clock.now())
        .unwrap();
    fixture.clock.advance_millis(10);
    let second = fixture
        .packager
        .package(&fixture.text_event("evt-2", "sender-a", "second"), fixture.clock.now())
        .unwrap();
    fixture.clock.advance_millis(10);
    let other_source = fixture
        .packager
        .package(&fixture.text_event("evt-3", "sender-b", "other"), fixture.clock.now())
        .unwrap();
    fixture.queue.enqueue(&first).unwrap();
    fixture.queue.enqueue(&second).unwrap();
    fixture.queue.enqueue(&other_source).unwrap();

    // First delivery: oldest entry of sender-a.
    let leased = fixture.queue.dequeue().unwrap().unwrap();
    assert_eq!(leased.package.processing_id, first.processing_id);

    // sender-a has an in-flight lease, so sender-b is delivered next.
    let leased_other = fixture.queue.dequeue().unwrap().unwrap();
    assert_eq!(leased_other.package.processing_id, other_source.processing_id);
    assert!(fixture.queue.dequeue().unwrap().is_none());

    // After ack, sender-a's second entry becomes deliverable.
    fixture.queue.ack(&first.processing_id).unwrap();
    let leased_second = fixture.queue.dequeue().unwrap().unwrap();
    assert_eq!(leased_second.package.processing_id, second.processing_id);
}

#[test]
fn lapsed_lease_makes_the_entry_deliverable_again() {
    let fixture = Fixture::new();
    let package = fixture
        .packager
        .package(&fixture.text_event("evt-1", "sender-a", "hello"), fixture.clock.now())
        .unwrap();
    fixture.queue.enqueue(&package).unwrap();
    assert!(fixture.queue.dequeue().unwrap().is_some());
    assert!(fixture.queue.dequeue().unwrap().is_none());

    fixture.clock.advance_millis(LEASE_MS);
    let redelivered = fixture.queue.dequeue().unwrap().unwrap();
    assert_eq!(redelivered.package.processing_id, package.processing_id);
}

#[test]
fn release_returns_the_entry_immediately() {
    let fixture = Fixture::new();
    let package = fixture
        .packager
        .package(&fixture.text_event("evt-1", "sender-a", "hello"), fixture.clock.now())
        .unwrap();
    fixture.queue.enqueue(&package).unwrap();
    assert!(fixture.queue.dequeue().unwrap().is_some());
    fixture.queue.release(&package.processing_id).unwrap();
    assert!(fixture.queue.dequeue().unwrap().is_some());
}

// ============================================================================
// SECTION: Deadlines and Rotation
// ============================================================================

#[test]
fn sweep_tombstones_expired_entries_and_audits_them() {
    let fixture = Fixture::new();
    let package = fixture
        .packager
        .package(&fixture.text_event("evt-1", "sender-a", "hello"), fixture.clock.now())
        .unwrap();
    fixture.queue.enqueue(&package).unwrap();

    fixture.clock.advance_millis(DEADLINE_MS);
    assert_eq!(fixture.queue.sweep_expired().unwrap(), 1);
    assert_eq!(fixture.queue.depth().unwrap(), 0);
    assert!(fixture.queue.dequeue().unwrap().is_none());

    let entries = fixture
        .audit
        .entries_in_range(Timestamp::from_unix_millis(0), fixture.clock.now())
        .unwrap();
    assert!(
        entries
            .iter()
            .any(|entry| entry.record.action.as_str() == "input_expired")
    );
}

#[test]
fn rotation_keeps_old_entries_readable() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000)));
    let keys = Arc::new(QueueKeyHolder::generate());
    let queue = InputQueue::open(
        &dir.path().join("queue.db"),
        Arc::clone(&keys),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        DEADLINE_MS,
        LEASE_MS,
    )
    .unwrap();
    let packager = Packager::new(*b"per-deployment-sender-salt------", 1024);
    let package = packager
        .package(
            &RawInboundEvent {
                event_id: EventId::new("evt-1"),
                sender: "sender".to_string(),
                text: Some("pre-rotation".to_string()),
                media: Vec::new(),
            },
            clock.now(),
        )
        .unwrap();
    queue.enqueue(&package).unwrap();
    keys.rotate().unwrap();
    let leased = queue.dequeue().unwrap().unwrap();
    assert_eq!(leased.package.text.as_deref(), Some("pre-rotation"));
}

#[test]
fn undecryptable_entry_is_quarantined_with_security_audit() {
    let dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap());
    let clock = Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_000)));
    let packager = Packager::new(*b"per-deployment-sender-salt------", 1024);
    let package = packager
        .package(
            &RawInboundEvent {
                event_id: EventId::new("evt-1"),
                sender: "sender".to_string(),
                text: Some("sealed under another key".to_string()),
                media: Vec::new(),
            },
            clock.now(),
        )
        .unwrap();

    let path = dir.path().join("queue.db");
    {
        let writer = InputQueue::open(
            &path,
            Arc::new(QueueKeyHolder::generate()),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            DEADLINE_MS,
            LEASE_MS,
        )
        .unwrap();
        writer.enqueue(&package).unwrap();
    }

    // Reopen with different key material: the entry must fail its tag check.
    let reader = InputQueue::open(
        &path,
        Arc::new(QueueKeyHolder::generate()),
        Arc::clone(&audit) as Arc<dyn AuditLog>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        DEADLINE_MS,
        LEASE_MS,
    )
    .unwrap();
    match reader.dequeue() {
        Err(QueueError::Decryption(id)) => assert_eq!(id, package.processing_id),
        other => panic!("expected decryption failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(reader.depth().unwrap(), 0);
    let entries = audit
        .entries_in_range(Timestamp::from_unix_millis(0), Timestamp::from_unix_millis(10_000))
        .unwrap();
    assert!(
        entries
            .iter()
            .any(|entry| entry.record.action.as_str() == "security_violation")
    );
}
