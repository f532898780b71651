// crates/phi-gate-runtime/src/dispatcher.rs
// ============================================================================
// Module: Medical Dispatcher
// Description: Routes leased queue entries into sessions and the task runner.
// Purpose: Bind inputs to tokens, triage them, and launch staged workflows.
// Dependencies: phi-gate-core, phi-gate-queue, serde_json, tracing
// ============================================================================

//! ## Overview
//! The Dispatcher consumes Input Queue entries (the queue's per-source FIFO
//! and visibility leases make it single-threaded per session while parallel
//! across sessions), deduplicates by transport event and processing
//! identifier, binds each entry to a token through the source directory,
//! opens a session, invokes the triage engine, and routes: reject is audited
//! and acknowledged, human review goes straight to the highest-priority
//! queue, and clinical processing launches the staged analysis workflow.
//! Backpressure from the runner is a bounded wait; on saturation the entry's
//! lease is released so the queue redelivers it later.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::Duration;

use phi_gate_core::ActorId;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::CancelSignal;
use phi_gate_core::Classified;
use phi_gate_core::Clock;
use phi_gate_core::Component;
use phi_gate_core::FaultKind;
use phi_gate_core::CorrelationId;
use phi_gate_core::InputPackage;
use phi_gate_core::ProcessingStore;
use phi_gate_core::SessionOutcome;
use phi_gate_core::SessionSnapshot;
use phi_gate_core::SourceId;
use phi_gate_core::Stage;
use phi_gate_core::StoreError;
use phi_gate_core::TokenId;
use phi_gate_core::TriageContext;
use phi_gate_core::TriageDecision;
use phi_gate_core::TriageRoute;
use phi_gate_core::TriageRules;
use phi_gate_core::Urgency;
use phi_gate_core::evaluate_triage;
use phi_gate_queue::InputQueue;
use phi_gate_queue::LeasedEntry;
use phi_gate_queue::QueueError;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::runner::RunnerError;
use crate::runner::TaskRunner;
use crate::session::SessionError;
use crate::session::SessionManager;
use crate::workflow::DecisionPayload;
use crate::workflow::HumanReviewPayload;
use crate::workflow::ImagePrepPayload;
use crate::workflow::TaskFactory;

// ============================================================================
// SECTION: Token Directory
// ============================================================================

/// Maps pseudonymized sources to their processing tokens.
///
/// Registration happens when the care team links a patient's channel; the
/// dispatcher only ever reads.
pub trait TokenDirectory: Send + Sync {
    /// Returns the token registered for a source, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the lookup backend fails.
    fn token_for_source(&self, source: &SourceId) -> Result<Option<TokenId>, StoreError>;
}

/// In-memory source directory for embedded deployments and tests.
///
/// # Invariants
/// - Reads vastly outnumber writes; a reader-writer lock guards the map.
#[derive(Default)]
pub struct InMemoryTokenDirectory {
    /// Source-to-token map.
    map: RwLock<std::collections::HashMap<SourceId, TokenId>>,
}

impl InMemoryTokenDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the token for a source.
    pub fn register(&self, source: SourceId, token: TokenId) {
        if let Ok(mut map) = self.map.write() {
            map.insert(source, token);
        }
    }
}

impl TokenDirectory for InMemoryTokenDirectory {
    fn token_for_source(&self, source: &SourceId) -> Result<Option<TokenId>, StoreError> {
        self.map
            .read()
            .map(|map| map.get(source).cloned())
            .map_err(|_| StoreError::Unavailable("token directory lock poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors surfaced by the dispatcher loop.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Input queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Session manager failure.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Store adapter failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Task runner refused the work.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

// ============================================================================
// SECTION: Dedup Window
// ============================================================================

/// Sliding window of recently seen identifiers.
///
/// # Invariants
/// - Holds at most `capacity` identifiers; eviction is FIFO.
struct DedupWindow {
    /// Membership set.
    seen: HashSet<String>,
    /// Eviction order.
    order: VecDeque<String>,
    /// Maximum identifiers retained.
    capacity: usize,
}

impl DedupWindow {
    /// Creates a window with the given capacity.
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns true when the identifier was already present.
    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Inserts an identifier, evicting the oldest past capacity.
    fn insert(&mut self, id: String) {
        if self.seen.insert(id.clone()) {
            self.order.push_back(id);
            while self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
    }

    /// Removes an identifier (used when an entry is released for redelivery).
    fn remove(&mut self, id: &str) {
        if self.seen.remove(id) {
            self.order.retain(|seen| seen != id);
        }
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Identifiers retained for duplicate-delivery detection.
const DEDUP_CAPACITY: usize = 16_384;

/// Medical Dispatcher.
///
/// # Invariants
/// - At most one in-flight entry per source (enforced by queue leases).
/// - Exactly one workflow instance runs per transport event.
pub struct Dispatcher {
    /// Encrypted input queue.
    queue: Arc<InputQueue>,
    /// Source-to-token directory.
    directory: Arc<dyn TokenDirectory>,
    /// Session manager.
    sessions: Arc<SessionManager>,
    /// Processing Store for triage context reads.
    processing: Arc<dyn ProcessingStore>,
    /// Task runner.
    runner: Arc<TaskRunner>,
    /// Task factory.
    factory: TaskFactory,
    /// Triage rule set.
    rules: TriageRules,
    /// Audit log.
    audit: Arc<dyn AuditLog>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Duplicate-delivery window over event and processing identifiers.
    dedup: Mutex<DedupWindow>,
    /// Tokens refused new work after an unreconcilable fault.
    degraded: Mutex<HashSet<TokenId>>,
}

impl Dispatcher {
    /// Creates the dispatcher over its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Composition root wiring.")]
    pub fn new(
        queue: Arc<InputQueue>,
        directory: Arc<dyn TokenDirectory>,
        sessions: Arc<SessionManager>,
        processing: Arc<dyn ProcessingStore>,
        runner: Arc<TaskRunner>,
        factory: TaskFactory,
        rules: TriageRules,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            directory,
            sessions,
            processing,
            runner,
            factory,
            rules,
            audit,
            clock,
            dedup: Mutex::new(DedupWindow::new(DEDUP_CAPACITY)),
            degraded: Mutex::new(HashSet::new()),
        }
    }

    /// Clears the degraded mark for a token after operator intervention.
    pub fn restore_token(&self, token_id: &TokenId) {
        if let Ok(mut degraded) = self.degraded.lock() {
            degraded.remove(token_id);
        }
    }

    /// Processes at most one queue entry. Returns true when an entry was
    /// consumed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] on infrastructure failure; undecryptable
    /// entries are quarantined by the queue and reported consumed.
    pub async fn run_once(&self) -> Result<bool, DispatchError> {
        let entry = match self.queue.dequeue() {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(false),
            // The queue has already tombstoned and audited the entry.
            Err(QueueError::Decryption(_)) => return Ok(true),
            Err(error) => return Err(error.into()),
        };
        self.process_entry(entry).await?;
        Ok(true)
    }

    /// Runs the dispatch loop until the signal cancels.
    pub async fn run(&self, cancel: CancelSignal) {
        loop {
            if cancel.is_canceled() {
                return;
            }
            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(Duration::from_millis(25)).await,
                Err(error) => {
                    warn!(%error, "dispatch iteration failed");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
            }
        }
    }

    /// Runs the queue deadline sweeper until the signal cancels, at most
    /// once per second.
    pub async fn run_queue_sweeper(&self, cancel: CancelSignal) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if cancel.is_canceled() {
                return;
            }
            match self.queue.sweep_expired() {
                Ok(0) => {}
                Ok(expired) => info!(expired, "queue entries expired"),
                Err(error) => warn!(%error, "queue sweep failed"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Processes one leased entry through dedup, binding, triage, and
    /// routing.
    async fn process_entry(&self, entry: LeasedEntry) -> Result<(), DispatchError> {
        let package = entry.package;
        let correlation = CorrelationId::new(package.processing_id.as_str());

        if self.already_seen(&package)? {
            self.record(
                None,
                &correlation,
                AuditAction::InputRejected,
                AuditOutcome::Rejected,
                Some("duplicate".to_string()),
            );
            self.queue.ack(&package.processing_id)?;
            return Ok(());
        }

        // On failure the entry stays leased and will be redelivered once the
        // lease lapses; the redelivery must not look like a duplicate.
        let result = self.bind_and_route(package.clone(), &correlation).await;
        if result.is_err() {
            let _ = self.forget(&package);
        }
        result
    }

    /// Binds a deduplicated entry to its token and routes it.
    async fn bind_and_route(
        &self,
        package: InputPackage,
        correlation: &CorrelationId,
    ) -> Result<(), DispatchError> {
        let correlation = correlation.clone();
        let Some(token_id) = self.directory.token_for_source(&package.source_id)? else {
            self.record(
                None,
                &correlation,
                AuditAction::InputRejected,
                AuditOutcome::Rejected,
                Some("unknown_source".to_string()),
            );
            self.queue.ack(&package.processing_id)?;
            self.forget(&package)?;
            return Ok(());
        };

        if self.is_degraded(&token_id) {
            self.record(
                Some(&token_id),
                &correlation,
                AuditAction::InputRejected,
                AuditOutcome::Rejected,
                Some("token_degraded".to_string()),
            );
            self.queue.ack(&package.processing_id)?;
            return Ok(());
        }

        self.record(
            Some(&token_id),
            &correlation,
            AuditAction::InputReceived,
            AuditOutcome::Ok,
            Some(package.input_type.as_str().to_string()),
        );

        // Previous-submission context must be read before the new session
        // becomes the latest one.
        let previous_submission_at = self
            .guard_fatal(&token_id, self.processing.latest_session_for_token(&token_id))?
            .map(|previous| previous.created_at);
        let open_high_grade_case =
            self.guard_fatal(&token_id, self.processing.open_high_grade_case(&token_id))?;

        let session = self.sessions.create(
            token_id.clone(),
            package.input_type,
            correlation.clone(),
        )?;
        let mut package = package;
        package.session_id = Some(session.session_id.clone());

        let decision = evaluate_triage(
            &self.rules,
            &package,
            &TriageContext {
                session: session.clone(),
                open_high_grade_case,
                previous_submission_at,
            },
            self.clock.now(),
        );
        self.record_triage(&session, &decision);

        match decision.route {
            TriageRoute::Reject => {
                self.sessions.close(&session.session_id, SessionOutcome::Rejected)?;
                self.queue.ack(&package.processing_id)?;
            }
            TriageRoute::HumanReview => {
                self.launch(
                    &session,
                    Stage::HumanReview,
                    serde_json::to_value(&HumanReviewPayload {
                        reason: reason_label(&decision),
                    })
                    .map_err(|err| StoreError::Serialization(err.to_string()))?,
                    &package,
                )
                .await?;
            }
            TriageRoute::ClinicalProcessing => {
                let (stage, payload) = if package.input_type.has_media() {
                    (
                        Stage::ImagePrep,
                        serde_json::to_value(&ImagePrepPayload {
                            package: package.clone(),
                            triage_urgency: decision.urgency,
                        }),
                    )
                } else {
                    (
                        Stage::Decision,
                        serde_json::to_value(&DecisionPayload {
                            detection: None,
                            triage_urgency: decision.urgency,
                        }),
                    )
                };
                let payload =
                    payload.map_err(|err| StoreError::Serialization(err.to_string()))?;
                self.launch(&session, stage, payload, &package).await?;
            }
        }
        Ok(())
    }

    /// Enqueues the first workflow task and acknowledges the entry, backing
    /// off to redelivery when the runner is saturated.
    async fn launch(
        &self,
        session: &SessionSnapshot,
        stage: Stage,
        payload: serde_json::Value,
        package: &InputPackage,
    ) -> Result<(), DispatchError> {
        let task = self.factory.build(
            stage,
            session.session_id.clone(),
            session.token_id.clone(),
            session.audit_trail_id.clone(),
            payload,
        );
        let cancel = self.sessions.cancel_scope(&session.session_id)?;
        match self.runner.enqueue(task, cancel).await {
            Ok(()) => {
                self.queue.ack(&package.processing_id)?;
                Ok(())
            }
            Err(RunnerError::Saturated(queue)) => {
                // Bounded wait exhausted: release the lease so the queue
                // redelivers, and forget the ids so redelivery is not
                // mistaken for a duplicate.
                warn!(queue, "runner saturated; releasing entry for redelivery");
                self.queue.release(&package.processing_id)?;
                self.forget(package)?;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Records the entry's identifiers, returning true for duplicates.
    fn already_seen(&self, package: &InputPackage) -> Result<bool, DispatchError> {
        let mut dedup = self.dedup.lock().map_err(|_| {
            DispatchError::Store(StoreError::Unavailable("dedup lock poisoned".to_string()))
        })?;
        let event_key = format!("evt/{}", package.event_id);
        let processing_key = format!("proc/{}", package.processing_id);
        if dedup.contains(&event_key) || dedup.contains(&processing_key) {
            return Ok(true);
        }
        dedup.insert(event_key);
        dedup.insert(processing_key);
        Ok(false)
    }

    /// Returns true when the token is refused new work.
    fn is_degraded(&self, token_id: &TokenId) -> bool {
        self.degraded.lock().is_ok_and(|degraded| degraded.contains(token_id))
    }

    /// Intercepts unreconcilable store faults, marking the token degraded
    /// before propagating.
    fn guard_fatal<T>(
        &self,
        token_id: &TokenId,
        result: Result<T, StoreError>,
    ) -> Result<T, DispatchError> {
        match result {
            Err(error) if error.fault_kind() == FaultKind::Fatal => {
                if let Ok(mut degraded) = self.degraded.lock() {
                    degraded.insert(token_id.clone());
                }
                self.record(
                    Some(token_id),
                    &CorrelationId::new(token_id.as_str()),
                    AuditAction::ComponentDegraded,
                    AuditOutcome::Escalated,
                    Some(error.to_string()),
                );
                Err(DispatchError::Store(error))
            }
            other => other.map_err(DispatchError::Store),
        }
    }

    /// Forgets an entry's identifiers after a release or rejection.
    fn forget(&self, package: &InputPackage) -> Result<(), DispatchError> {
        let mut dedup = self.dedup.lock().map_err(|_| {
            DispatchError::Store(StoreError::Unavailable("dedup lock poisoned".to_string()))
        })?;
        dedup.remove(&format!("evt/{}", package.event_id));
        dedup.remove(&format!("proc/{}", package.processing_id));
        Ok(())
    }

    /// Emits the triage audit entry for a routed input.
    fn record_triage(&self, session: &SessionSnapshot, decision: &TriageDecision) {
        let action = match decision.route {
            TriageRoute::Reject => AuditAction::TriageReject,
            TriageRoute::HumanReview | TriageRoute::ClinicalProcessing => {
                match decision.urgency {
                    Urgency::Routine => AuditAction::TriageRoutine,
                    Urgency::Urgent => AuditAction::TriageUrgent,
                    Urgency::Emergency => AuditAction::TriageEmergency,
                }
            }
        };
        let outcome = if decision.route == TriageRoute::Reject {
            AuditOutcome::Rejected
        } else {
            AuditOutcome::Ok
        };
        self.record(
            Some(&session.token_id),
            &session.audit_trail_id,
            action,
            outcome,
            Some(reason_label(decision)),
        );
    }

    /// Emits one dispatcher audit record.
    fn record(
        &self,
        token_id: Option<&TokenId>,
        correlation: &CorrelationId,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        let component = match action {
            AuditAction::TriageRoutine
            | AuditAction::TriageUrgent
            | AuditAction::TriageEmergency
            | AuditAction::TriageReject => Component::Triage,
            _ => Component::Dispatcher,
        };
        let record = AuditRecord {
            timestamp: self.clock.now(),
            actor_id: ActorId::new("dispatcher"),
            token_id: token_id.cloned(),
            action,
            component,
            outcome,
            correlation_id: correlation.clone(),
            detail,
        };
        if let Err(error) = self.audit.append(&record) {
            warn!(%error, action = record.action.as_str(), "audit append failed");
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Renders a triage decision's reason codes as a stable comma label.
fn reason_label(decision: &TriageDecision) -> String {
    decision
        .reason_codes
        .iter()
        .map(|code| code.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
