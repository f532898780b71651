// crates/phi-gate-runtime/src/workflow.rs
// ============================================================================
// Module: Clinical Workflow Executor
// Description: Stage implementations for the analysis workflow chain.
// Purpose: Drive image_prep -> detection -> decision -> notification -> audit.
// Dependencies: async-trait, phi-gate-core, serde_json, tracing, uuid
// ============================================================================

//! ## Overview
//! The executor implements every stage the runner can deliver. Stages hand
//! structured payloads down the chain and declare their downstream tasks on
//! success; the runner schedules those only after the producing stage acks.
//! All clinical computation is delegated: detection to the [`Detector`]
//! adapter, decision assembly to the [`DecisionEngine`] facade, delivery to
//! the [`Notifier`] adapter. Stage code here only orchestrates, persists,
//! and audits.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use phi_gate_core::ActorId;
use phi_gate_core::AdapterError;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::CancelSignal;
use phi_gate_core::Classified;
use phi_gate_core::Clock;
use phi_gate_core::Component;
use phi_gate_core::CorrelationId;
use phi_gate_core::DecisionContext;
use phi_gate_core::DecisionEngine;
use phi_gate_core::DetectionRequest;
use phi_gate_core::Detector;
use phi_gate_core::InputPackage;
use phi_gate_core::LppDetection;
use phi_gate_core::MedicalDecision;
use phi_gate_core::MedicalImage;
use phi_gate_core::MessageTemplate;
use phi_gate_core::NotificationChannel;
use phi_gate_core::NotificationRequest;
use phi_gate_core::Notifier;
use phi_gate_core::ProcessingStore;
use phi_gate_core::SessionId;
use phi_gate_core::SessionOutcome;
use phi_gate_core::Stage;
use phi_gate_core::StoreError;
use phi_gate_core::TaskId;
use phi_gate_core::TaskSpec;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::Urgency;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::runner::StageExecutor;
use crate::runner::StageOutput;
use crate::session::SessionError;
use crate::session::SessionManager;

// ============================================================================
// SECTION: Task Factory
// ============================================================================

/// Builds task specifications with the configured retry and deadline policy.
///
/// # Invariants
/// - Task identifiers are unique for the deployment lifetime.
#[derive(Clone)]
pub struct TaskFactory {
    /// Maximum delivery attempts before escalation.
    max_attempts: u32,
    /// Base retry delay in milliseconds.
    retry_delay_base_ms: u64,
    /// Per-stage deadlines in milliseconds.
    stage_deadlines_ms: BTreeMap<Stage, u64>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
}

impl TaskFactory {
    /// Fallback stage deadline when no override exists (milliseconds).
    const DEFAULT_DEADLINE_MS: u64 = 300_000;

    /// Creates a factory from the configured policy.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        retry_delay_base_ms: u64,
        stage_deadlines_ms: BTreeMap<Stage, u64>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            max_attempts,
            retry_delay_base_ms,
            stage_deadlines_ms,
            clock,
        }
    }

    /// Builds one task for a stage within a session.
    #[must_use]
    pub fn build(
        &self,
        stage: Stage,
        session_id: SessionId,
        token_id: TokenId,
        correlation_id: CorrelationId,
        payload: Value,
    ) -> TaskSpec {
        let deadline_ms = self
            .stage_deadlines_ms
            .get(&stage)
            .copied()
            .unwrap_or(Self::DEFAULT_DEADLINE_MS);
        TaskSpec {
            task_id: TaskId::new(format!("task-{}", Uuid::new_v4())),
            queue: stage.queue(),
            session_id,
            token_id,
            stage,
            payload,
            attempt: 1,
            max_attempts: self.max_attempts,
            retry_delay_base_ms: self.retry_delay_base_ms,
            deadline: self.clock.now().saturating_add_millis(deadline_ms),
            correlation_id,
        }
    }
}

// ============================================================================
// SECTION: Stage Payloads
// ============================================================================

/// Payload of an `image_prep` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImagePrepPayload {
    /// Packaged input carrying the media references.
    pub package: InputPackage,
    /// Urgency assigned by triage.
    pub triage_urgency: Urgency,
}

/// Payload of a `detection` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct DetectionPayload {
    /// Registered images, primary first.
    pub images: Vec<MedicalImage>,
    /// Urgency assigned by triage.
    pub triage_urgency: Urgency,
}

/// Payload of a `decision` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionPayload {
    /// Detection result, absent for text-only cases.
    pub detection: Option<LppDetection>,
    /// Urgency assigned by triage.
    pub triage_urgency: Urgency,
}

/// Payload of a `notification` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Assembled decision to announce.
    pub decision: MedicalDecision,
}

/// Payload of an `audit_finalize` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct FinalizePayload {
    /// Outcome to close the session with.
    pub outcome: SessionOutcome,
}

/// Payload of a `human_review` task.
#[derive(Debug, Serialize, Deserialize)]
pub struct HumanReviewPayload {
    /// Stable reason label for the review queue entry.
    pub reason: String,
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Stage executor for the clinical analysis workflow.
///
/// # Invariants
/// - Stages reference only token identifiers.
/// - Every terminal path audits exactly once at the point it becomes
///   terminal (the runner audits retries and escalations).
pub struct WorkflowExecutor {
    /// Processing Store adapter.
    processing: Arc<dyn ProcessingStore>,
    /// Session manager for finalization.
    sessions: Arc<SessionManager>,
    /// Computer-vision adapter.
    detector: Arc<dyn Detector>,
    /// Decision engine facade.
    engine: Arc<DecisionEngine>,
    /// Outbound notification adapter.
    notifier: Arc<dyn Notifier>,
    /// Audit log.
    audit: Arc<dyn AuditLog>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Task factory for downstream stages.
    factory: TaskFactory,
}

impl WorkflowExecutor {
    /// Creates the executor over its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments, reason = "Composition root wiring.")]
    pub fn new(
        processing: Arc<dyn ProcessingStore>,
        sessions: Arc<SessionManager>,
        detector: Arc<dyn Detector>,
        engine: Arc<DecisionEngine>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        factory: TaskFactory,
    ) -> Self {
        Self {
            processing,
            sessions,
            detector,
            engine,
            notifier,
            audit,
            clock,
            factory,
        }
    }

    // ------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------

    /// Registers media references and hands off to detection.
    fn image_prep(&self, task: &TaskSpec) -> Result<StageOutput, AdapterError> {
        let payload: ImagePrepPayload = parse_payload(&task.payload)?;
        let now = self.clock.now();
        let mut images = Vec::new();
        for media in &payload.package.media {
            if !media.content_type.starts_with("image/") {
                continue;
            }
            let image = MedicalImage {
                token_id: task.token_id.clone(),
                url: media.url.clone(),
                content_type: media.content_type.clone(),
                content_hash: media.content_hash.clone(),
                registered_at: now,
            };
            self.processing.insert_image(&image).map_err(store_fault)?;
            images.push(image);
        }
        if images.is_empty() {
            return Err(AdapterError::non_retryable("image_prep task carried no images"));
        }
        let downstream = self.factory.build(
            Stage::Detection,
            task.session_id.clone(),
            task.token_id.clone(),
            task.correlation_id.clone(),
            encode_payload(&DetectionPayload {
                images,
                triage_urgency: payload.triage_urgency,
            })?,
        );
        Ok(StageOutput {
            downstream: vec![downstream],
        })
    }

    /// Runs the detector over the primary image.
    async fn detection(
        &self,
        task: &TaskSpec,
        cancel: &CancelSignal,
    ) -> Result<StageOutput, AdapterError> {
        let payload: DetectionPayload = parse_payload(&task.payload)?;
        let Some(primary) = payload.images.first() else {
            return Err(AdapterError::non_retryable("detection task carried no images"));
        };
        let detection = self
            .detector
            .detect(
                &DetectionRequest {
                    token_id: task.token_id.clone(),
                    image: primary.clone(),
                },
                cancel,
            )
            .await?;
        self.processing.insert_detection(&detection).map_err(store_fault)?;
        let downstream = self.factory.build(
            Stage::Decision,
            task.session_id.clone(),
            task.token_id.clone(),
            task.correlation_id.clone(),
            encode_payload(&DecisionPayload {
                detection: Some(detection),
                triage_urgency: payload.triage_urgency,
            })?,
        );
        Ok(StageOutput {
            downstream: vec![downstream],
        })
    }

    /// Assembles and persists the medical decision.
    fn decision(&self, task: &TaskSpec) -> Result<StageOutput, AdapterError> {
        let payload: DecisionPayload = parse_payload(&task.payload)?;
        let patient = self.load_patient(&task.token_id)?;
        let ctx = DecisionContext {
            detection: payload.detection,
            patient,
            triage_urgency: payload.triage_urgency,
        };
        let outcome = self
            .engine
            .evaluate(&ctx, self.clock.now())
            .map_err(|err| AdapterError::non_retryable(err.to_string()))?;
        self.processing.insert_decision(&outcome.decision).map_err(store_fault)?;
        self.record_decision_audit(
            task,
            AuditAction::DecisionRecorded,
            AuditOutcome::Ok,
            Some(outcome.decision.urgency_level.as_str().to_string()),
        );
        if outcome.low_confidence {
            self.record_decision_audit(
                task,
                AuditAction::LowConfidence,
                AuditOutcome::Escalated,
                None,
            );
        }

        let mut downstream = vec![self.factory.build(
            Stage::Notification,
            task.session_id.clone(),
            task.token_id.clone(),
            task.correlation_id.clone(),
            encode_payload(&NotificationPayload {
                decision: outcome.decision.clone(),
            })?,
        )];
        if outcome.decision.escalation_required {
            downstream.push(self.factory.build(
                Stage::HumanReview,
                task.session_id.clone(),
                task.token_id.clone(),
                task.correlation_id.clone(),
                encode_payload(&HumanReviewPayload {
                    reason: if outcome.low_confidence {
                        "low_confidence".to_string()
                    } else {
                        "escalation_required".to_string()
                    },
                })?,
            ));
        }
        Ok(StageOutput {
            downstream,
        })
    }

    /// Delivers the clinical notification for an assembled decision.
    async fn notification(
        &self,
        task: &TaskSpec,
        cancel: &CancelSignal,
    ) -> Result<StageOutput, AdapterError> {
        let payload: NotificationPayload = parse_payload(&task.payload)?;
        let patient = self.load_patient(&task.token_id)?;
        let urgency = payload.decision.urgency_level;
        let channel = NotificationChannel::for_urgency(urgency);
        let request = NotificationRequest {
            session_id: task.session_id.clone(),
            token_id: task.token_id.clone(),
            urgency,
            channel,
            message_template_id: template_for(urgency),
            template_params: BTreeMap::from([
                ("alias".to_string(), patient.patient_alias.as_str().to_string()),
                ("urgency".to_string(), urgency.as_str().to_string()),
                (
                    "follow_up_hours".to_string(),
                    payload.decision.follow_up_interval_hours.to_string(),
                ),
            ]),
        };
        let receipt = self.notifier.deliver(&request, cancel).await?;
        self.record_notifier_audit(
            task,
            AuditAction::NotificationSent,
            AuditOutcome::Ok,
            Some(receipt.channel),
        );
        let downstream = self.factory.build(
            Stage::AuditFinalize,
            task.session_id.clone(),
            task.token_id.clone(),
            task.correlation_id.clone(),
            encode_payload(&FinalizePayload {
                outcome: if payload.decision.escalation_required {
                    SessionOutcome::HumanReview
                } else {
                    SessionOutcome::Completed
                },
            })?,
        );
        Ok(StageOutput {
            downstream: vec![downstream],
        })
    }

    /// Closes the session; the closing audit entry is the session manager's.
    fn audit_finalize(&self, task: &TaskSpec) -> Result<StageOutput, AdapterError> {
        let payload: FinalizePayload = parse_payload(&task.payload)?;
        match self.sessions.close(&task.session_id, payload.outcome) {
            Ok(()) => Ok(StageOutput::default()),
            // A session that expired or closed while the chain drained has
            // already emitted its terminal audit entry.
            Err(SessionError::NotActive(_) | SessionError::NotFound) => Ok(StageOutput::default()),
            Err(SessionError::Store(error)) => Err(store_fault(error)),
        }
    }

    /// Hands the case to the human review channel and finalizes.
    async fn human_review(
        &self,
        task: &TaskSpec,
        cancel: &CancelSignal,
    ) -> Result<StageOutput, AdapterError> {
        let payload: HumanReviewPayload = parse_payload(&task.payload)?;
        let patient = self.load_patient(&task.token_id)?;
        let request = NotificationRequest {
            session_id: task.session_id.clone(),
            token_id: task.token_id.clone(),
            urgency: Urgency::Urgent,
            channel: NotificationChannel::HumanReview,
            message_template_id: MessageTemplate::HumanReviewRequest,
            template_params: BTreeMap::from([
                ("alias".to_string(), patient.patient_alias.as_str().to_string()),
                ("reason".to_string(), payload.reason),
            ]),
        };
        let receipt = self.notifier.deliver(&request, cancel).await?;
        self.record_notifier_audit(
            task,
            AuditAction::NotificationSent,
            AuditOutcome::Ok,
            Some(receipt.channel),
        );
        if let Err(error @ SessionError::Store(_)) =
            self.sessions.close(&task.session_id, SessionOutcome::HumanReview)
        {
            warn!(%error, "failed to finalize reviewed session");
        }
        Ok(StageOutput::default())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Loads the tokenized projection backing a task.
    fn load_patient(&self, token_id: &TokenId) -> Result<TokenizedPatient, AdapterError> {
        self.processing
            .tokenized_patient(token_id)
            .map_err(store_fault)?
            .ok_or_else(|| AdapterError::non_retryable("token has no projection"))
    }

    /// Emits a decision engine audit record.
    fn record_decision_audit(
        &self,
        task: &TaskSpec,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        self.append_audit(AuditRecord {
            timestamp: self.clock.now(),
            actor_id: ActorId::new("decision_engine"),
            token_id: Some(task.token_id.clone()),
            action,
            component: Component::DecisionEngine,
            outcome,
            correlation_id: task.correlation_id.clone(),
            detail,
        });
    }

    /// Emits a notifier audit record.
    fn record_notifier_audit(
        &self,
        task: &TaskSpec,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        self.append_audit(AuditRecord {
            timestamp: self.clock.now(),
            actor_id: ActorId::new("notifier"),
            token_id: Some(task.token_id.clone()),
            action,
            component: Component::Notifier,
            outcome,
            correlation_id: task.correlation_id.clone(),
            detail,
        });
    }

    /// Appends an audit record, logging (never masking) append failures.
    fn append_audit(&self, record: AuditRecord) {
        if let Err(error) = self.audit.append(&record) {
            warn!(%error, action = record.action.as_str(), "audit append failed");
        }
    }
}

#[async_trait]
impl StageExecutor for WorkflowExecutor {
    async fn execute(
        &self,
        task: &TaskSpec,
        cancel: &CancelSignal,
    ) -> Result<StageOutput, AdapterError> {
        if cancel.is_canceled() {
            return Err(AdapterError::Canceled);
        }
        match task.stage {
            Stage::ImagePrep => self.image_prep(task),
            Stage::Detection => self.detection(task, cancel).await,
            Stage::Decision => self.decision(task),
            Stage::Notification => self.notification(task, cancel).await,
            Stage::AuditFinalize => self.audit_finalize(task),
            Stage::HumanReview => self.human_review(task, cancel).await,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a stage payload, treating mismatches as contract violations.
fn parse_payload<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, AdapterError> {
    serde_json::from_value(payload.clone())
        .map_err(|err| AdapterError::non_retryable(format!("payload schema breach: {err}")))
}

/// Encodes a stage payload.
fn encode_payload<T: Serialize>(payload: &T) -> Result<Value, AdapterError> {
    serde_json::to_value(payload)
        .map_err(|err| AdapterError::non_retryable(format!("payload encode failure: {err}")))
}

/// Maps a store failure onto the adapter taxonomy.
fn store_fault(error: StoreError) -> AdapterError {
    AdapterError::Fault {
        kind: error.fault_kind(),
        message: error.to_string(),
    }
}

/// Selects the clinical template for an urgency grade.
const fn template_for(urgency: Urgency) -> MessageTemplate {
    match urgency {
        Urgency::Routine => MessageTemplate::RoutineSummary,
        Urgency::Urgent => MessageTemplate::UrgentSummary,
        Urgency::Emergency => MessageTemplate::EmergencyAlert,
    }
}
