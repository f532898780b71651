// crates/phi-gate-core/src/lib.rs
// ============================================================================
// Module: PHI Gate Core
// Description: Data model, interfaces, and pure engines for PHI Gate.
// Purpose: Provide the shared, I/O-free foundation for every other crate.
// Dependencies: async-trait, serde, serde_json, sha2, thiserror
// ============================================================================

//! ## Overview
//! `phi-gate-core` is the foundation of the PHI Gate orchestration backbone:
//! the canonical identifiers and records on both sides of the tokenization
//! bridge, the fault taxonomy, the session and task models, the append-only
//! audit vocabulary, the backend-agnostic interfaces, and the two pure
//! engines (triage and decision merge). The crate performs no I/O and reads
//! no wall-clock time; hosts inject a [`Clock`].
//!
//! Security posture: the type system enforces the trust boundary: only the
//! Tokenization Service can hold both store traits, and Processing-zone
//! types cannot carry hospital identity fields; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Canonical data model.
pub mod core;
/// Backend-agnostic interfaces.
pub mod interfaces;
/// Pure engines.
pub mod runtime;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use crate::core::audit::AuditAction;
pub use crate::core::audit::AuditEntry;
pub use crate::core::audit::AuditOutcome;
pub use crate::core::audit::AuditRecord;
pub use crate::core::audit::Component;
pub use crate::core::cancel::CancelSignal;
pub use crate::core::decision::AnatomicalLocation;
pub use crate::core::decision::EvidenceLevel;
pub use crate::core::decision::GuidelineReference;
pub use crate::core::decision::LppDetection;
pub use crate::core::decision::LppGrade;
pub use crate::core::decision::MedicalDecision;
pub use crate::core::decision::MedicalImage;
pub use crate::core::decision::PartialDecision;
pub use crate::core::decision::Recommendation;
pub use crate::core::fault::Classified;
pub use crate::core::fault::FaultKind;
pub use crate::core::identifiers::ActorId;
pub use crate::core::identifiers::AuditEntryId;
pub use crate::core::identifiers::CorrelationId;
pub use crate::core::identifiers::EventId;
pub use crate::core::identifiers::HospitalMrn;
pub use crate::core::identifiers::PatientId;
pub use crate::core::identifiers::ProcessingId;
pub use crate::core::identifiers::RequestId;
pub use crate::core::identifiers::SessionId;
pub use crate::core::identifiers::SourceId;
pub use crate::core::identifiers::TaskId;
pub use crate::core::identifiers::TokenAlias;
pub use crate::core::identifiers::TokenId;
pub use crate::core::input::InputPackage;
pub use crate::core::input::InputType;
pub use crate::core::input::MediaRef;
pub use crate::core::input::content_hash_hex;
pub use crate::core::input::hex_lower;
pub use crate::core::patient::AgeRange;
pub use crate::core::patient::ApprovalStatus;
pub use crate::core::patient::GenderCategory;
pub use crate::core::patient::HospitalPatient;
pub use crate::core::patient::RiskFactors;
pub use crate::core::patient::TokenizationRequest;
pub use crate::core::patient::TokenizedPatient;
pub use crate::core::phi::PhiViolation;
pub use crate::core::phi::scan_projection;
pub use crate::core::phi::scan_text;
pub use crate::core::session::SessionOutcome;
pub use crate::core::session::SessionRecord;
pub use crate::core::session::SessionSnapshot;
pub use crate::core::session::SessionState;
pub use crate::core::task::QueueName;
pub use crate::core::task::Stage;
pub use crate::core::task::TaskDisposition;
pub use crate::core::task::TaskSpec;
pub use crate::core::task::retry_delay_ms;
pub use crate::core::time::Clock;
pub use crate::core::time::ManualClock;
pub use crate::core::time::SystemClock;
pub use crate::core::time::Timestamp;
pub use crate::core::triage::ReasonCode;
pub use crate::core::triage::TriageDecision;
pub use crate::core::triage::TriageRoute;
pub use crate::core::triage::Urgency;
pub use crate::interfaces::AdapterError;
pub use crate::interfaces::AuditLog;
pub use crate::interfaces::DecisionContext;
pub use crate::interfaces::DecisionModule;
pub use crate::interfaces::DeliveryReceipt;
pub use crate::interfaces::DetectionRequest;
pub use crate::interfaces::Detector;
pub use crate::interfaces::HospitalStore;
pub use crate::interfaces::MessageTemplate;
pub use crate::interfaces::NotificationChannel;
pub use crate::interfaces::NotificationRequest;
pub use crate::interfaces::Notifier;
pub use crate::interfaces::ProcessingStore;
pub use crate::interfaces::ProtocolStore;
pub use crate::interfaces::StoreError;
pub use crate::runtime::decision::DecisionEngine;
pub use crate::runtime::decision::DecisionEngineError;
pub use crate::runtime::decision::DecisionOutcome;
pub use crate::runtime::triage::TriageContext;
pub use crate::runtime::triage::TriageRules;
pub use crate::runtime::triage::evaluate as evaluate_triage;
