// crates/phi-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: PHI Gate Interfaces
// Description: Backend-agnostic interfaces for stores, adapters, and modules.
// Purpose: Define the contract surfaces used by the PHI Gate runtime.
// Dependencies: async-trait, serde, thiserror, crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how PHI Gate integrates with external systems without
//! embedding backend-specific details. Store traits are synchronous and
//! bounded; adapter traits (detector, notifier) are asynchronous and accept
//! an explicit cancellation signal. Implementations must fail closed on
//! missing or invalid data, and no implementation outside the Tokenization
//! Service may hold references to both stores.
//!
//! Security posture: adapter implementations consume untrusted inputs; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::audit::AuditEntry;
use crate::core::audit::AuditRecord;
use crate::core::cancel::CancelSignal;
use crate::core::decision::GuidelineReference;
use crate::core::decision::LppDetection;
use crate::core::decision::LppGrade;
use crate::core::decision::MedicalDecision;
use crate::core::decision::MedicalImage;
use crate::core::decision::PartialDecision;
use crate::core::fault::Classified;
use crate::core::fault::FaultKind;
use crate::core::identifiers::AuditEntryId;
use crate::core::identifiers::HospitalMrn;
use crate::core::identifiers::PatientId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TokenId;
use crate::core::patient::ApprovalStatus;
use crate::core::patient::HospitalPatient;
use crate::core::patient::TokenizationRequest;
use crate::core::patient::TokenizedPatient;
use crate::core::session::SessionRecord;
use crate::core::time::Timestamp;
use crate::core::triage::Urgency;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Errors returned by store adapters.
///
/// # Invariants
/// - Variants are stable for programmatic handling and map 1:1 onto the
///   fault taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unavailable or timed out; retryable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Uniqueness or ownership constraint refused the write.
    #[error("store constraint violated: {0}")]
    Constraint(String),
    /// Stored bytes failed to deserialize or verify.
    #[error("store corruption: {0}")]
    Corrupt(String),
    /// Record failed to serialize for storage.
    #[error("store serialization failure: {0}")]
    Serialization(String),
}

impl Classified for StoreError {
    fn fault_kind(&self) -> FaultKind {
        match self {
            Self::Unavailable(_) => FaultKind::Transient,
            Self::Constraint(_) => FaultKind::BusinessConflict,
            Self::Corrupt(_) => FaultKind::Fatal,
            Self::Serialization(_) => FaultKind::NonRetryable,
        }
    }
}

// ============================================================================
// SECTION: Hospital Store
// ============================================================================

/// Adapter owning the hospital-zone store.
///
/// Only the Tokenization Service may hold an implementation of this trait
/// together with a [`ProcessingStore`].
pub trait HospitalStore: Send + Sync {
    /// Inserts an admitted patient record (hospital admission flow).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or the MRN already exists.
    fn insert_patient(&self, patient: &HospitalPatient) -> Result<(), StoreError>;

    /// Looks up a patient by medical record number.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn patient_by_mrn(&self, mrn: &HospitalMrn) -> Result<Option<HospitalPatient>, StoreError>;

    /// Looks up a patient by hospital identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn patient_by_id(&self, patient_id: &PatientId)
    -> Result<Option<HospitalPatient>, StoreError>;

    /// Inserts a tokenization request; idempotent by token identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_request(&self, request: &TokenizationRequest) -> Result<(), StoreError>;

    /// Updates the approval status of a request by token identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails or no request exists.
    fn update_request_status(
        &self,
        token_id: &TokenId,
        status: ApprovalStatus,
    ) -> Result<(), StoreError>;

    /// Returns the active approved request for a `(patient, system)` pair,
    /// if one exists at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn active_request(
        &self,
        patient_id: &PatientId,
        requesting_system: &str,
        now: Timestamp,
    ) -> Result<Option<TokenizationRequest>, StoreError>;

    /// Looks up a request by token identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn request_by_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Option<TokenizationRequest>, StoreError>;

    /// Returns pending requests created at or before the cutoff, for the
    /// reconciliation sweep.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn pending_requests_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<TokenizationRequest>, StoreError>;
}

// ============================================================================
// SECTION: Processing Store
// ============================================================================

/// Adapter owning the processing-zone store.
///
/// Every record is keyed by token identifier; no method accepts or returns
/// hospital identity types.
pub trait ProcessingStore: Send + Sync {
    /// Writes or refreshes a tokenized projection; idempotent by token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn upsert_tokenized_patient(&self, projection: &TokenizedPatient) -> Result<(), StoreError>;

    /// Reads a tokenized projection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn tokenized_patient(&self, token_id: &TokenId)
    -> Result<Option<TokenizedPatient>, StoreError>;

    /// Registers a medical image reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_image(&self, image: &MedicalImage) -> Result<(), StoreError>;

    /// Persists a detection result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_detection(&self, detection: &LppDetection) -> Result<(), StoreError>;

    /// Persists an assembled medical decision.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn insert_decision(&self, decision: &MedicalDecision) -> Result<(), StoreError>;

    /// Returns true when the token has an open high-grade (3-4) case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn open_high_grade_case(&self, token_id: &TokenId) -> Result<bool, StoreError>;

    /// Writes or refreshes a session record; idempotent by session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn upsert_session(&self, session: &SessionRecord) -> Result<(), StoreError>;

    /// Reads a session record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// Returns the most recently created session for a token, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn latest_session_for_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Option<SessionRecord>, StoreError>;
}

// ============================================================================
// SECTION: Audit Log
// ============================================================================

/// Append-only audit log spanning both trust zones by token only.
pub trait AuditLog: Send + Sync {
    /// Appends one record and returns its monotonic entry identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the append fails.
    fn append(&self, record: &AuditRecord) -> Result<AuditEntryId, StoreError>;

    /// Reads entries for one token in append order. Restricted to
    /// authorized roles by the caller.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn entries_for_token(&self, token_id: &TokenId) -> Result<Vec<AuditEntry>, StoreError>;

    /// Reads entries in a closed timestamp range in append order
    /// (administrative).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn entries_in_range(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    /// Removes entries older than the retention cutoff; returns the count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the prune fails.
    fn prune_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

// ============================================================================
// SECTION: Adapter Errors
// ============================================================================

/// Errors returned by asynchronous adapters (detector, notifier).
///
/// # Invariants
/// - `Canceled` is terminal but is not a failure: the runner neither retries
///   nor escalates it.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Operation observed its cancellation signal at a checkpoint.
    #[error("operation canceled")]
    Canceled,
    /// Operation failed with the given classification.
    #[error("{} adapter failure: {message}", kind.as_str())]
    Fault {
        /// Fault classification driving retry policy.
        kind: FaultKind,
        /// Stable description of the failure.
        message: String,
    },
}

impl AdapterError {
    /// Creates a retryable transient failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Fault {
            kind: FaultKind::Transient,
            message: message.into(),
        }
    }

    /// Creates a terminal contract-violation failure.
    #[must_use]
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::Fault {
            kind: FaultKind::NonRetryable,
            message: message.into(),
        }
    }

    /// Returns the fault classification, or `None` for cancellation.
    #[must_use]
    pub const fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            Self::Canceled => None,
            Self::Fault {
                kind, ..
            } => Some(*kind),
        }
    }
}

// ============================================================================
// SECTION: Detector
// ============================================================================

/// Request handed to the computer-vision adapter.
///
/// # Invariants
/// - References only a token identifier; media stays by URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionRequest {
    /// Processing token the detection runs for.
    pub token_id: TokenId,
    /// Image reference registered in the Processing Store.
    pub image: MedicalImage,
}

/// Computer-vision detection adapter.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Runs detection over one registered image.
    ///
    /// Implementations must poll `cancel` at checkpoints and return
    /// [`AdapterError::Canceled`] promptly once it latches.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on cancellation or failure.
    async fn detect(
        &self,
        request: &DetectionRequest,
        cancel: &CancelSignal,
    ) -> Result<LppDetection, AdapterError>;
}

// ============================================================================
// SECTION: Decision Modules
// ============================================================================

/// Context handed to guideline modules for evaluation.
///
/// # Invariants
/// - Values are snapshots; modules must not mutate them.
/// - Contains only tokenized data.
/// - `detection` is `None` for text-only cases; grading modules abstain.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionContext {
    /// Detection under consideration, when the case carried media.
    pub detection: Option<LppDetection>,
    /// Tokenized projection of the patient.
    pub patient: TokenizedPatient,
    /// Urgency grade assigned by triage.
    pub triage_urgency: Urgency,
}

/// Pluggable evidence-based guideline module.
///
/// Modules are pure: evaluation never suspends and never performs I/O.
pub trait DecisionModule: Send + Sync {
    /// Returns the module's stable name for justification text.
    fn name(&self) -> &'static str;

    /// Evaluates the context, or abstains with `None`.
    fn evaluate(&self, ctx: &DecisionContext) -> Option<PartialDecision>;
}

/// Read-only clinical protocol reference table.
pub trait ProtocolStore: Send + Sync {
    /// Returns the guideline citations applicable to a severity grade.
    fn references_for(&self, grade: LppGrade) -> Vec<GuidelineReference>;
}

// ============================================================================
// SECTION: Notifier
// ============================================================================

/// Clinical notification channel.
///
/// # Invariants
/// - Variants are stable; labels are the channel routing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Routine clinical review channel.
    MedicalRoutine,
    /// Same-day clinical attention channel.
    MedicalUrgent,
    /// Immediate clinical attention channel.
    MedicalEmergency,
    /// Human review queue channel.
    HumanReview,
    /// Patient-facing acknowledgement channel.
    PatientAck,
}

impl NotificationChannel {
    /// Returns the channel routing label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MedicalRoutine => "#medical-routine",
            Self::MedicalUrgent => "#medical-urgent",
            Self::MedicalEmergency => "#medical-emergency",
            Self::HumanReview => "#human-review",
            Self::PatientAck => "#patient-ack",
        }
    }

    /// Returns the clinical channel for an urgency grade.
    #[must_use]
    pub const fn for_urgency(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Routine => Self::MedicalRoutine,
            Urgency::Urgent => Self::MedicalUrgent,
            Urgency::Emergency => Self::MedicalEmergency,
        }
    }
}

/// Message template identifier rendered by the notification adapter.
///
/// # Invariants
/// - Templates reference the token alias only, never identity fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplate {
    /// Routine case summary.
    RoutineSummary,
    /// Urgent case summary.
    UrgentSummary,
    /// Emergency alert.
    EmergencyAlert,
    /// Human review request.
    HumanReviewRequest,
    /// Generic patient acknowledgement.
    PatientAcknowledgement,
}

impl MessageTemplate {
    /// Returns a stable template label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RoutineSummary => "routine_summary",
            Self::UrgentSummary => "urgent_summary",
            Self::EmergencyAlert => "emergency_alert",
            Self::HumanReviewRequest => "human_review_request",
            Self::PatientAcknowledgement => "patient_acknowledgement",
        }
    }
}

/// Outbound notification request.
///
/// # Invariants
/// - Carries the token identifier and alias-bearing template parameters
///   only; hospital identity fields never reach a notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Session the notification concludes.
    pub session_id: SessionId,
    /// Processing token the case concerns.
    pub token_id: TokenId,
    /// Urgency grade of the case.
    pub urgency: Urgency,
    /// Destination channel.
    pub channel: NotificationChannel,
    /// Template to render.
    pub message_template_id: MessageTemplate,
    /// Template parameters (token alias, coded labels).
    pub template_params: BTreeMap<String, String>,
}

/// Delivery receipt returned by a notifier.
///
/// # Invariants
/// - `channel` echoes the routing label actually delivered to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Channel routing label delivered to.
    pub channel: String,
    /// Delivery instant.
    pub delivered_at: Timestamp,
    /// Provider-assigned message identifier, when reported.
    pub provider_message_id: Option<String>,
}

/// Outbound notification adapter.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    ///
    /// Implementations must poll `cancel` at checkpoints and return
    /// [`AdapterError::Canceled`] promptly once it latches.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on cancellation or failure.
    async fn deliver(
        &self,
        request: &NotificationRequest,
        cancel: &CancelSignal,
    ) -> Result<DeliveryReceipt, AdapterError>;
}
