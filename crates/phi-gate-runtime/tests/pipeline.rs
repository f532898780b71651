// crates/phi-gate-runtime/tests/pipeline.rs
// ============================================================================
// Module: Orchestration Pipeline Tests
// Description: End-to-end seed scenarios from inbound event to final audit.
// ============================================================================
//! ## Overview
//! Drives the full backbone (packager, encrypted queue, dispatcher, session
//! manager, task runner, workflow executor) over real SQLite stores with
//! in-process adapters, and checks the seed scenarios: benign routine,
//! high-grade image, low confidence, and session timeout.

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
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use phi_gate_core::AdapterError;
use phi_gate_core::AgeRange;
use phi_gate_core::AnatomicalLocation;
use phi_gate_core::AuditLog;
use phi_gate_core::CancelSignal;
use phi_gate_core::Clock;
use phi_gate_core::DecisionContext;
use phi_gate_core::DecisionEngine;
use phi_gate_core::DecisionModule;
use phi_gate_core::DeliveryReceipt;
use phi_gate_core::DetectionRequest;
use phi_gate_core::Detector;
use phi_gate_core::EventId;
use phi_gate_core::EvidenceLevel;
use phi_gate_core::GenderCategory;
use phi_gate_core::LppDetection;
use phi_gate_core::LppGrade;
use phi_gate_core::ManualClock;
use phi_gate_core::NotificationRequest;
use phi_gate_core::Notifier;
use phi_gate_core::PartialDecision;
use phi_gate_core::ProcessingStore;
use phi_gate_core::Recommendation;
use phi_gate_core::RiskFactors;
use phi_gate_core::SessionState;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::TriageRules;
use phi_gate_core::Urgency;
use phi_gate_queue::InputQueue;
use phi_gate_queue::Packager;
use phi_gate_queue::QueueKeyHolder;
use phi_gate_queue::RawInboundEvent;
use phi_gate_queue::RawMedia;
use phi_gate_runtime::Dispatcher;
use phi_gate_runtime::InMemoryTokenDirectory;
use phi_gate_runtime::RunnerConfig;
use phi_gate_runtime::SessionManager;
use phi_gate_runtime::TaskFactory;
use phi_gate_runtime::TaskRunner;
use phi_gate_runtime::WorkflowExecutor;
use phi_gate_store_sqlite::SqliteAuditLog;
use phi_gate_store_sqlite::SqliteProcessingStore;

// ============================================================================
// SECTION: In-Process Adapters
// ============================================================================

/// Detector returning a scripted result, or waiting for cancellation.
struct ScriptedDetector {
    /// Scripted grade, confidence, and location; `None` hangs until the
    /// cancellation signal latches.
    result: Option<(u8, f64, AnatomicalLocation)>,
    /// Injected clock for detection timestamps.
    clock: Arc<ManualClock>,
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(
        &self,
        request: &DetectionRequest,
        cancel: &CancelSignal,
    ) -> Result<LppDetection, AdapterError> {
        let Some((grade, confidence, location)) = self.result else {
            // Cooperative checkpoint loop: return promptly once canceled.
            loop {
                if cancel.is_canceled() {
                    return Err(AdapterError::Canceled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        Ok(LppDetection {
            token_id: request.token_id.clone(),
            grade: LppGrade::new(grade).unwrap(),
            confidence,
            location,
            model_version: "scripted-detector".to_string(),
            detected_at: self.clock.now(),
        })
    }
}

/// Notifier recording every delivery.
#[derive(Default)]
struct RecordingNotifier {
    /// Delivered requests, in order.
    deliveries: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotifier {
    fn deliveries(&self) -> Vec<NotificationRequest> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(
        &self,
        request: &NotificationRequest,
        _cancel: &CancelSignal,
    ) -> Result<DeliveryReceipt, AdapterError> {
        self.deliveries.lock().unwrap().push(request.clone());
        Ok(DeliveryReceipt {
            channel: request.channel.as_str().to_string(),
            delivered_at: Timestamp::from_unix_millis(0),
            provider_message_id: None,
        })
    }
}

/// Grading module mapping detection grade onto urgency with evidence A.
struct GradingModule;

impl DecisionModule for GradingModule {
    fn name(&self) -> &'static str {
        "grading"
    }

    fn evaluate(&self, ctx: &DecisionContext) -> Option<PartialDecision> {
        let detection = ctx.detection.as_ref()?;
        let urgency = match detection.grade.get() {
            0 | 1 => Urgency::Routine,
            2 => Urgency::Urgent,
            _ => Urgency::Emergency,
        };
        Some(PartialDecision {
            urgency,
            evidence_level: EvidenceLevel::A,
            confidence: detection.confidence,
            recommendations: vec![Recommendation {
                code: "pressure_offloading".to_string(),
                directive: "offload the affected site".to_string(),
            }],
            references: Vec::new(),
            follow_up_interval_hours: None,
            justification: "graded from detection".to_string(),
        })
    }
}

/// Fallback module for text-only cases, echoing the triage urgency.
struct FollowUpModule;

impl DecisionModule for FollowUpModule {
    fn name(&self) -> &'static str {
        "follow_up"
    }

    fn evaluate(&self, ctx: &DecisionContext) -> Option<PartialDecision> {
        if ctx.detection.is_some() {
            return None;
        }
        Some(PartialDecision {
            urgency: ctx.triage_urgency,
            evidence_level: EvidenceLevel::C,
            confidence: 0.9,
            recommendations: vec![Recommendation {
                code: "clinical_follow_up".to_string(),
                directive: "answer the follow-up through the care channel".to_string(),
            }],
            references: Vec::new(),
            follow_up_interval_hours: None,
            justification: "text-only follow-up".to_string(),
        })
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

const TOKEN: &str = "00112233445566778899aabbccddeeff";
const TTL_MS: u64 = 900_000;

struct Harness {
    _dir: tempfile::TempDir,
    packager: Packager,
    queue: Arc<InputQueue>,
    dispatcher: Dispatcher,
    sessions: Arc<SessionManager>,
    runner: Arc<TaskRunner>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    processing: Arc<SqliteProcessingStore>,
    audit: Arc<SqliteAuditLog>,
    notifier: Arc<RecordingNotifier>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(detector_result: Option<(u8, f64, AnatomicalLocation)>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let processing =
            Arc::new(SqliteProcessingStore::open(&dir.path().join("processing.db")).unwrap());
        let audit = Arc::new(SqliteAuditLog::open(&dir.path().join("audit.db")).unwrap());
        let clock =
            Arc::new(ManualClock::starting_at(Timestamp::from_unix_millis(1_700_000_000_000)));

        let token = TokenId::new(TOKEN);
        processing
            .upsert_tokenized_patient(&TokenizedPatient {
                token_id: token.clone(),
                patient_alias: TokenAlias::new("Amber Falcon"),
                age_range: AgeRange::Senior,
                gender_category: GenderCategory::Unknown,
                risk_factors: RiskFactors {
                    diabetes: true,
                    ..RiskFactors::default()
                },
                medical_conditions: BTreeSet::from(["E11.9".to_string()]),
                token_expires_at: Timestamp::from_unix_millis(i64::MAX),
            })
            .unwrap();

        let packager = Packager::new(*b"pipeline-test-sender-salt-------", 25 * 1024 * 1024);
        let queue = Arc::new(
            InputQueue::open(
                &dir.path().join("input-queue.db"),
                Arc::new(QueueKeyHolder::generate()),
                Arc::clone(&audit) as Arc<dyn AuditLog>,
                Arc::clone(&clock) as Arc<dyn Clock>,
                TTL_MS,
                60_000,
            )
            .unwrap(),
        );
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&processing) as Arc<dyn ProcessingStore>,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            TTL_MS,
        ));
        let factory = TaskFactory::new(
            3,
            0,
            BTreeMap::new(),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Arc::new(DecisionEngine::new(
            vec![Box::new(GradingModule), Box::new(FollowUpModule)],
            0.60,
        ));
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&processing) as Arc<dyn ProcessingStore>,
            Arc::clone(&sessions),
            Arc::new(ScriptedDetector {
                result: detector_result,
                clock: Arc::clone(&clock),
            }),
            engine,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            factory.clone(),
        ));
        let runner = TaskRunner::new(
            executor,
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            RunnerConfig::default(),
        );
        let handles = runner.start();

        let directory = Arc::new(InMemoryTokenDirectory::new());
        directory.register(packager.source_id("+1-555-0100"), token);

        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            directory,
            Arc::clone(&sessions),
            Arc::clone(&processing) as Arc<dyn ProcessingStore>,
            Arc::clone(&runner),
            factory,
            TriageRules::default(),
            Arc::clone(&audit) as Arc<dyn AuditLog>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );

        Self {
            _dir: dir,
            packager,
            queue,
            dispatcher,
            sessions,
            runner,
            handles,
            processing,
            audit,
            notifier,
            clock,
        }
    }

    async fn submit(&self, event: RawInboundEvent) {
        let package = self.packager.package(&event, self.clock.now()).unwrap();
        self.queue.enqueue(&package).unwrap();
        assert!(self.dispatcher.run_once().await.unwrap());
    }

    fn actions(&self) -> Vec<(String, String)> {
        self.audit
            .entries_for_token(&TokenId::new(TOKEN))
            .unwrap()
            .into_iter()
            .map(|entry| {
                (
                    entry.record.action.as_str().to_string(),
                    entry.record.detail.unwrap_or_default(),
                )
            })
            .collect()
    }

    async fn wait_for_action(&self, action: &str) {
        for _ in 0..300 {
            if self.actions().iter().any(|(seen, _)| seen == action) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("audit action '{action}' not reached; trail: {:?}", self.actions());
    }

    async fn shutdown(self) {
        self.runner.shutdown();
        for handle in self.handles {
            handle.await.unwrap();
        }
    }
}

fn text_event(text: &str) -> RawInboundEvent {
    RawInboundEvent {
        event_id: EventId::new("evt-1"),
        sender: "+1-555-0100".to_string(),
        text: Some(text.to_string()),
        media: Vec::new(),
    }
}

fn image_event() -> RawInboundEvent {
    RawInboundEvent {
        event_id: EventId::new("evt-2"),
        sender: "+1-555-0100".to_string(),
        text: None,
        media: vec![RawMedia {
            url: "https://media.example/wound.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            byte_size: 180_000,
            leading_bytes: Some(vec![0xFF, 0xD8, 0xFF, 0xE1]),
        }],
    }
}

/// Asserts that `expected` appears as an ordered subsequence of the trail.
fn assert_subsequence(trail: &[(String, String)], expected: &[(&str, &str)]) {
    let mut cursor = 0;
    for (action, detail) in trail {
        if cursor < expected.len()
            && action == expected[cursor].0
            && (expected[cursor].1.is_empty() || detail == expected[cursor].1)
        {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expected.len(),
        "missing audit subsequence from {expected:?}; trail: {trail:?}"
    );
}

// ============================================================================
// SECTION: Seed Scenarios
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn scenario_benign_routine_text() {
    let harness = Harness::new(None);
    harness.submit(text_event("follow-up question")).await;
    harness.wait_for_action("session_closed").await;

    assert_subsequence(
        &harness.actions(),
        &[
            ("input_received", ""),
            ("session_created", ""),
            ("triage_routine", ""),
            ("task_enqueued", "decision"),
            ("task_succeeded", "decision"),
            ("notification_sent", "#medical-routine"),
            ("session_closed", "completed"),
        ],
    );

    let deliveries = harness.notifier.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].channel.as_str(), "#medical-routine");
    assert_eq!(deliveries[0].template_params.get("alias").map(String::as_str), Some("Amber Falcon"));

    let decisions = harness.processing.decisions_for_token(&TokenId::new(TOKEN)).unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].urgency_level, Urgency::Routine);
    assert!(!decisions[0].escalation_required);

    assert_eq!(harness.queue.depth().unwrap(), 0);
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_high_grade_image_escalates() {
    let harness = Harness::new(Some((3, 0.88, AnatomicalLocation::Sacrum)));
    harness.submit(image_event()).await;
    harness.wait_for_action("session_closed").await;

    let decisions = harness.processing.decisions_for_token(&TokenId::new(TOKEN)).unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].urgency_level, Urgency::Emergency);
    assert_eq!(decisions[0].evidence_level, EvidenceLevel::A);
    assert!(decisions[0].escalation_required);

    // Wait until the review handoff also lands.
    for _ in 0..300 {
        if harness.notifier.deliveries().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let channels: Vec<String> = harness
        .notifier
        .deliveries()
        .iter()
        .map(|delivery| delivery.channel.as_str().to_string())
        .collect();
    assert!(channels.contains(&"#medical-emergency".to_string()));
    assert!(channels.contains(&"#human-review".to_string()));

    assert_subsequence(
        &harness.actions(),
        &[
            ("task_succeeded", "image_prep"),
            ("task_succeeded", "detection"),
            ("decision_recorded", "emergency"),
        ],
    );
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_low_confidence_forces_review() {
    let harness = Harness::new(Some((2, 0.42, AnatomicalLocation::Heel)));
    harness.submit(image_event()).await;
    harness.wait_for_action("low_confidence").await;

    for _ in 0..300 {
        if harness
            .notifier
            .deliveries()
            .iter()
            .any(|delivery| delivery.channel.as_str() == "#human-review")
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let decisions = harness.processing.decisions_for_token(&TokenId::new(TOKEN)).unwrap();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].escalation_required);
    assert!(
        harness
            .notifier
            .deliveries()
            .iter()
            .any(|delivery| delivery.channel.as_str() == "#human-review")
    );
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn scenario_session_timeout_cancels_in_flight_work() {
    // Detector hangs: the detection stage can only end by cancellation.
    let harness = Harness::new(None);
    harness.submit(image_event()).await;
    harness.wait_for_action("task_succeeded").await; // image_prep done

    harness.clock.advance_millis(TTL_MS);
    let expired = harness.sessions.sweep().unwrap();
    assert_eq!(expired.len(), 1);

    harness.wait_for_action("session_expired").await;
    harness.wait_for_action("task_canceled").await;

    let actions = harness.actions();
    assert!(!actions.iter().any(|(action, _)| action == "notification_sent"));
    assert!(!actions.iter().any(|(action, _)| action == "task_retried"));
    assert_eq!(
        harness.sessions.snapshot(&expired[0].session_id).unwrap().state,
        SessionState::Expired
    );
    assert!(harness.notifier.deliveries().is_empty());
    harness.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_transport_delivery_runs_one_workflow() {
    let harness = Harness::new(None);

    // The transport redelivers the same event; the packager assigns a fresh
    // processing id each time, so dedup keys off the transport event id.
    let event = text_event("follow-up question");
    let first = harness.packager.package(&event, harness.clock.now()).unwrap();
    let second = harness.packager.package(&event, harness.clock.now()).unwrap();
    assert_ne!(first.processing_id, second.processing_id);
    harness.queue.enqueue(&first).unwrap();
    harness.queue.enqueue(&second).unwrap();

    assert!(harness.dispatcher.run_once().await.unwrap());
    harness.wait_for_action("session_closed").await;
    assert!(harness.dispatcher.run_once().await.unwrap());

    // Exactly one workflow ran; the duplicate was rejected.
    let sessions_created = harness
        .actions()
        .iter()
        .filter(|(action, _)| action == "session_created")
        .count();
    assert_eq!(sessions_created, 1);
    assert_eq!(harness.notifier.deliveries().len(), 1);
    assert_eq!(harness.processing.decisions_for_token(&TokenId::new(TOKEN)).unwrap().len(), 1);
    harness.shutdown().await;
}
