// crates/phi-gate-tokenize/src/service.rs
// ============================================================================
// Module: Tokenization Service
// Description: Two-phase token issuance bridging the two data stores.
// Purpose: Be the single component allowed to see both trust zones.
// Dependencies: phi-gate-core, rand, tracing, crate::alias
// ============================================================================

//! ## Overview
//! The service owns the only live references to both stores. Token issuance
//! is a two-phase write: (1) insert the request `pending` in the Hospital
//! Store, (2) write the tokenized projection to the Processing Store, (3)
//! flip the request to `approved`. Cross-store writes are not transactional;
//! consistency comes from the token as the sole linkage, idempotent inserts
//! keyed by token, the startup reconciliation sweep, and audit entries at
//! every transition. A per-pair critical section serializes issuance for one
//! `(patient, requesting_system)` pair.
//!
//! Security posture: this crate is the PHI boundary; every reverse lookup is
//! audited; see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use phi_gate_core::ActorId;
use phi_gate_core::AgeRange;
use phi_gate_core::ApprovalStatus;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::Classified;
use phi_gate_core::Clock;
use phi_gate_core::Component;
use phi_gate_core::CorrelationId;
use phi_gate_core::FaultKind;
use phi_gate_core::GenderCategory;
use phi_gate_core::HospitalMrn;
use phi_gate_core::HospitalPatient;
use phi_gate_core::HospitalStore;
use phi_gate_core::PhiViolation;
use phi_gate_core::ProcessingStore;
use phi_gate_core::RequestId;
use phi_gate_core::RiskFactors;
use phi_gate_core::StoreError;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizationRequest;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::scan_projection;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::alias::select_alias;

// ============================================================================
// SECTION: Roles and Callers
// ============================================================================

/// Roles recognized by the Tokenization Service.
///
/// # Invariants
/// - `PhiBridge` is the only role permitted to reverse a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServiceRole {
    /// May request and revoke tokens.
    TokenIssuer,
    /// May resolve tokenized projections.
    TokenReader,
    /// May reverse a token to a medical record number.
    PhiBridge,
}

/// Authenticated caller identity presented to every operation.
///
/// # Invariants
/// - `actor_id` names a system or operator, never a patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Caller identity recorded in audits.
    pub actor_id: ActorId,
    /// Roles granted to the caller.
    pub roles: BTreeSet<ServiceRole>,
}

impl Caller {
    /// Returns true when the caller holds the role.
    #[must_use]
    pub fn has_role(&self, role: ServiceRole) -> bool {
        self.roles.contains(&role)
    }
}

// ============================================================================
// SECTION: Results and Errors
// ============================================================================

/// Result of a token issuance.
///
/// # Invariants
/// - `reused = true` means an active grant already existed for the pair and
///   was returned unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    /// Issued (or reused) token identifier.
    pub token_id: TokenId,
    /// Deterministic display alias.
    pub token_alias: TokenAlias,
    /// Expiry instant of the grant.
    pub expires_at: Timestamp,
    /// Whether an existing active grant was returned.
    pub reused: bool,
}

/// Minimal projection returned by `resolve_token`.
///
/// # Invariants
/// - Contains no attribute narrower than the tokenized projection itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenProjection {
    /// Coarse age bucket.
    pub age_range: AgeRange,
    /// Coarse gender category.
    pub gender_category: GenderCategory,
    /// Closed-vocabulary risk factors.
    pub risk_factors: RiskFactors,
}

/// Errors returned by the Tokenization Service.
///
/// # Invariants
/// - Variants are stable for programmatic handling and HTTP mapping.
#[derive(Debug, Error)]
pub enum TokenizeError {
    /// Medical record number not present in the Hospital Store.
    #[error("medical record number not found")]
    NotFound,
    /// Caller lacks the role required by the operation.
    #[error("caller lacks required role")]
    Forbidden,
    /// Token has lapsed or the request was expired by reconciliation.
    #[error("token expired")]
    Expired,
    /// Token identifier is not known to the Hospital Store.
    #[error("token unknown")]
    Unknown,
    /// Tokenized projection failed the PHI guard scan.
    #[error("projection violates phi boundary: {0}")]
    PhiLeak(PhiViolation),
    /// Store adapter failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classified for TokenizeError {
    fn fault_kind(&self) -> FaultKind {
        match self {
            Self::NotFound | Self::Forbidden | Self::Expired | Self::Unknown => {
                FaultKind::BusinessConflict
            }
            Self::PhiLeak(_) => FaultKind::NonRetryable,
            Self::Store(inner) => inner.fault_kind(),
        }
    }
}

// ============================================================================
// SECTION: Service
// ============================================================================

/// Tokenization Service bridging the Hospital and Processing stores.
///
/// # Invariants
/// - The only component composing both store traits.
/// - Two-phase writes for one `(patient, system)` pair are serialized.
pub struct TokenizationService {
    /// Hospital Store adapter (PHI zone).
    hospital: Arc<dyn HospitalStore>,
    /// Processing Store adapter (tokenized zone).
    processing: Arc<dyn ProcessingStore>,
    /// Audit log.
    audit: Arc<dyn AuditLog>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Deployment salt for alias selection.
    alias_salt: String,
    /// Default grant TTL in milliseconds.
    default_ttl_ms: u64,
    /// Reconciliation grace window in milliseconds.
    reconciliation_grace_ms: u64,
    /// Per-pair critical sections for the two-phase write.
    pair_locks: Mutex<BTreeMap<String, Arc<Mutex<()>>>>,
}

impl TokenizationService {
    /// Creates the service over its stores and settings.
    #[must_use]
    pub fn new(
        hospital: Arc<dyn HospitalStore>,
        processing: Arc<dyn ProcessingStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        alias_salt: impl Into<String>,
        default_ttl_ms: u64,
        reconciliation_grace_ms: u64,
    ) -> Self {
        Self {
            hospital,
            processing,
            audit,
            clock,
            alias_salt: alias_salt.into(),
            default_ttl_ms,
            reconciliation_grace_ms,
            pair_locks: Mutex::new(BTreeMap::new()),
        }
    }

    /// Issues (or returns the active) token for a patient and system.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError::NotFound`] for an unknown MRN,
    /// [`TokenizeError::Forbidden`] for a caller without the issuer role,
    /// [`TokenizeError::PhiLeak`] when the projection fails the guard, and
    /// [`TokenizeError::Store`] on adapter failure.
    pub fn request_token(
        &self,
        caller: &Caller,
        mrn: &HospitalMrn,
        requesting_system: &str,
        ttl_ms: Option<u64>,
    ) -> Result<TokenGrant, TokenizeError> {
        if !caller.has_role(ServiceRole::TokenIssuer) {
            return Err(TokenizeError::Forbidden);
        }
        let patient = self.hospital.patient_by_mrn(mrn)?.ok_or(TokenizeError::NotFound)?;
        let pair_key = format!("{}/{requesting_system}", patient.patient_id);
        self.with_pair_lock(&pair_key, || {
            self.issue_locked(caller, &patient, requesting_system, ttl_ms)
        })
    }

    /// Resolves a token into its minimal projection.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError::Forbidden`] without the reader role,
    /// [`TokenizeError::Unknown`] for an unissued token,
    /// [`TokenizeError::Expired`] for lapsed or denied tokens, and
    /// [`TokenizeError::Store`] on adapter failure.
    pub fn resolve_token(
        &self,
        caller: &Caller,
        token_id: &TokenId,
    ) -> Result<TokenProjection, TokenizeError> {
        if !caller.has_role(ServiceRole::TokenReader) {
            return Err(TokenizeError::Forbidden);
        }
        let request = self.hospital.request_by_token(token_id)?.ok_or(TokenizeError::Unknown)?;
        let now = self.clock.now();
        match request.approval_status {
            ApprovalStatus::Approved if !now.reached(request.expires_at) => {}
            ApprovalStatus::Approved | ApprovalStatus::Pending | ApprovalStatus::Expired => {
                return Err(TokenizeError::Expired);
            }
            ApprovalStatus::Denied => return Err(TokenizeError::Forbidden),
        }
        let projection =
            self.processing.tokenized_patient(token_id)?.ok_or(TokenizeError::Unknown)?;
        self.record(
            caller,
            Some(token_id.clone()),
            AuditAction::TokenResolved,
            AuditOutcome::Ok,
            None,
        );
        Ok(TokenProjection {
            age_range: projection.age_range,
            gender_category: projection.gender_category,
            risk_factors: projection.risk_factors,
        })
    }

    /// Revokes a token; idempotent for already-revoked tokens.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError::Forbidden`] without the issuer role,
    /// [`TokenizeError::Unknown`] for an unissued token, and
    /// [`TokenizeError::Store`] on adapter failure.
    pub fn revoke_token(
        &self,
        caller: &Caller,
        token_id: &TokenId,
        reason: &str,
    ) -> Result<(), TokenizeError> {
        if !caller.has_role(ServiceRole::TokenIssuer) {
            return Err(TokenizeError::Forbidden);
        }
        let request = self.hospital.request_by_token(token_id)?.ok_or(TokenizeError::Unknown)?;
        if request.approval_status == ApprovalStatus::Denied {
            return Ok(());
        }
        self.hospital.update_request_status(token_id, ApprovalStatus::Denied)?;
        self.record(
            caller,
            Some(token_id.clone()),
            AuditAction::TokenRevoked,
            AuditOutcome::Ok,
            Some(reason.to_string()),
        );
        Ok(())
    }

    /// Reverses a token to its medical record number.
    ///
    /// Restricted to the narrowly scoped bridge role; every call, allowed or
    /// refused, is audited.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError::Forbidden`] without the bridge role,
    /// [`TokenizeError::Unknown`] for an unissued token, and
    /// [`TokenizeError::Store`] on adapter failure.
    pub fn bridge_lookup(
        &self,
        caller: &Caller,
        token_id: &TokenId,
    ) -> Result<HospitalMrn, TokenizeError> {
        if !caller.has_role(ServiceRole::PhiBridge) {
            self.record(
                caller,
                Some(token_id.clone()),
                AuditAction::BridgeLookup,
                AuditOutcome::Rejected,
                None,
            );
            return Err(TokenizeError::Forbidden);
        }
        let request = self.hospital.request_by_token(token_id)?.ok_or(TokenizeError::Unknown)?;
        let patient =
            self.hospital.patient_by_id(&request.patient_id)?.ok_or(TokenizeError::Unknown)?;
        self.record(
            caller,
            Some(token_id.clone()),
            AuditAction::BridgeLookup,
            AuditOutcome::Ok,
            None,
        );
        Ok(patient.hospital_mrn)
    }

    /// Expires orphan pending requests older than the grace window.
    ///
    /// Run at startup before the service accepts work. Returns the number of
    /// requests expired.
    ///
    /// # Errors
    ///
    /// Returns [`TokenizeError::Store`] on adapter failure.
    pub fn reconcile(&self, actor: &ActorId) -> Result<u64, TokenizeError> {
        let now = self.clock.now();
        let cutoff = Timestamp::from_unix_millis(
            now.as_unix_millis()
                .saturating_sub(i64::try_from(self.reconciliation_grace_ms).unwrap_or(i64::MAX)),
        );
        let orphans = self.hospital.pending_requests_before(cutoff)?;
        let mut expired = 0_u64;
        for orphan in orphans {
            self.hospital.update_request_status(&orphan.token_id, ApprovalStatus::Expired)?;
            self.audit_entry(AuditRecord {
                timestamp: self.clock.now(),
                actor_id: actor.clone(),
                token_id: Some(orphan.token_id.clone()),
                action: AuditAction::TokenExpired,
                component: Component::Tokenization,
                outcome: AuditOutcome::Expired,
                correlation_id: CorrelationId::new(orphan.request_id.as_str()),
                detail: Some("reconciliation".to_string()),
            });
            expired += 1;
        }
        if expired > 0 {
            warn!(expired, "reconciliation expired orphan pending requests");
        }
        Ok(expired)
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Issues a token while holding the pair critical section.
    fn issue_locked(
        &self,
        caller: &Caller,
        patient: &HospitalPatient,
        requesting_system: &str,
        ttl_ms: Option<u64>,
    ) -> Result<TokenGrant, TokenizeError> {
        let now = self.clock.now();
        if let Some(active) =
            self.hospital.active_request(&patient.patient_id, requesting_system, now)?
        {
            self.record(
                caller,
                Some(active.token_id.clone()),
                AuditAction::TokenRequested,
                AuditOutcome::Ok,
                Some("reused".to_string()),
            );
            return Ok(TokenGrant {
                token_id: active.token_id,
                token_alias: active.token_alias,
                expires_at: active.expires_at,
                reused: true,
            });
        }

        let token_id = generate_token_id();
        let token_alias = select_alias(&self.alias_salt, &token_id);
        let expires_at = now.saturating_add_millis(ttl_ms.unwrap_or(self.default_ttl_ms));
        let request = TokenizationRequest {
            request_id: RequestId::new(format!("req-{token_id}")),
            patient_id: patient.patient_id.clone(),
            token_id: token_id.clone(),
            token_alias: token_alias.clone(),
            requesting_system: requesting_system.to_string(),
            approval_status: ApprovalStatus::Pending,
            expires_at,
            created_at: now,
        };

        // Phase 1: pending request in the Hospital Store.
        self.hospital.insert_request(&request)?;
        self.record(
            caller,
            Some(token_id.clone()),
            AuditAction::TokenRequested,
            AuditOutcome::Ok,
            None,
        );

        // Phase 2: tokenized projection in the Processing Store, behind the
        // PHI guard.
        let projection = build_projection(patient, &token_id, &token_alias, expires_at, now);
        if let Some(violation) = scan_projection(patient, &projection) {
            self.hospital.update_request_status(&token_id, ApprovalStatus::Expired)?;
            self.record(
                caller,
                Some(token_id.clone()),
                AuditAction::SecurityViolation,
                AuditOutcome::Escalated,
                Some(violation.as_str().to_string()),
            );
            return Err(TokenizeError::PhiLeak(violation));
        }
        if let Err(error) = self.processing.upsert_tokenized_patient(&projection) {
            self.hospital.update_request_status(&token_id, ApprovalStatus::Expired)?;
            self.record(
                caller,
                Some(token_id.clone()),
                AuditAction::TokenExpired,
                AuditOutcome::Failed,
                Some("projection_write_failed".to_string()),
            );
            return Err(TokenizeError::Store(error));
        }

        // Phase 3: flip to approved.
        self.hospital.update_request_status(&token_id, ApprovalStatus::Approved)?;
        self.record(
            caller,
            Some(token_id.clone()),
            AuditAction::TokenApproved,
            AuditOutcome::Ok,
            None,
        );
        info!(token = %token_id, system = requesting_system, "token issued");
        Ok(TokenGrant {
            token_id,
            token_alias,
            expires_at,
            reused: false,
        })
    }

    /// Runs a closure inside the pair critical section.
    fn with_pair_lock<T>(
        &self,
        key: &str,
        operation: impl FnOnce() -> Result<T, TokenizeError>,
    ) -> Result<T, TokenizeError> {
        let pair_lock = {
            let mut locks = self.pair_locks.lock().map_err(|_| {
                TokenizeError::Store(StoreError::Unavailable("pair lock poisoned".to_string()))
            })?;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let _guard = pair_lock.lock().map_err(|_| {
            TokenizeError::Store(StoreError::Unavailable("pair lock poisoned".to_string()))
        })?;
        operation()
    }

    /// Emits one audit record for a caller-visible transition.
    fn record(
        &self,
        caller: &Caller,
        token_id: Option<TokenId>,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        let correlation = token_id
            .as_ref()
            .map_or_else(|| CorrelationId::new("tokenization"), |token| {
                CorrelationId::new(token.as_str())
            });
        self.audit_entry(AuditRecord {
            timestamp: self.clock.now(),
            actor_id: caller.actor_id.clone(),
            token_id,
            action,
            component: Component::Tokenization,
            outcome,
            correlation_id: correlation,
            detail,
        });
    }

    /// Appends an audit record, logging (never masking) append failures.
    fn audit_entry(&self, record: AuditRecord) {
        if let Err(error) = self.audit.append(&record) {
            warn!(%error, action = record.action.as_str(), "audit append failed");
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Generates a 128-bit token identifier from the operating system CSPRNG.
#[must_use]
pub fn generate_token_id() -> TokenId {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    TokenId::new(phi_gate_core::hex_lower(&bytes))
}

/// Closed mapping from condition-code prefixes to risk factors.
const RISK_PREFIXES: [(&str, fn(&mut RiskFactors)); 6] = [
    ("E11", |risks| risks.diabetes = true),
    ("E46", |risks| risks.malnutrition = true),
    ("R32", |risks| risks.incontinence = true),
    ("I73", |risks| risks.vascular_disease = true),
    ("Z74", |risks| risks.immobility = true),
    ("L89", |risks| risks.prior_pressure_injury = true),
];

/// Builds the tokenized projection for a hospital record.
fn build_projection(
    patient: &HospitalPatient,
    token_id: &TokenId,
    token_alias: &TokenAlias,
    expires_at: Timestamp,
    now: Timestamp,
) -> TokenizedPatient {
    let mut risk_factors = RiskFactors::default();
    let mut sanitized = BTreeSet::new();
    for condition in &patient.chronic_conditions {
        let code = sanitize_code(condition);
        if code.is_empty() {
            continue;
        }
        for (prefix, apply) in RISK_PREFIXES {
            if code.starts_with(prefix) {
                apply(&mut risk_factors);
            }
        }
        sanitized.insert(code);
    }
    TokenizedPatient {
        token_id: token_id.clone(),
        patient_alias: token_alias.clone(),
        age_range: age_bucket(&patient.date_of_birth, now),
        // The admission record carries no gender attribute; the projection
        // stays coarse rather than inferring one.
        gender_category: GenderCategory::Unknown,
        risk_factors,
        medical_conditions: sanitized,
        token_expires_at: expires_at,
    }
}

/// Keeps only code-shaped characters from a condition term.
fn sanitize_code(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '.')
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Average milliseconds per year, for coarse age bucketing.
const MILLIS_PER_YEAR: i64 = 31_556_952_000;

/// Buckets a `YYYY-MM-DD` date of birth into a coarse age range.
fn age_bucket(date_of_birth: &str, now: Timestamp) -> AgeRange {
    let birth_year: Option<i64> = date_of_birth.get(0..4).and_then(|year| year.parse().ok());
    let Some(birth_year) = birth_year else {
        return AgeRange::Adult;
    };
    let now_year = 1970 + now.as_unix_millis() / MILLIS_PER_YEAR;
    let years = now_year.saturating_sub(birth_year).clamp(0, 130);
    AgeRange::from_years(u8::try_from(years).unwrap_or(u8::MAX))
}
