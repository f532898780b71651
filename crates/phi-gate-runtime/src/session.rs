// crates/phi-gate-runtime/src/session.rs
// ============================================================================
// Module: Session Manager
// Description: Sharded session map with hard TTL and cancellation fan-out.
// Purpose: Bound every interaction envelope in time, inclusively.
// Dependencies: phi-gate-core, tokio, tracing, uuid
// ============================================================================

//! ## Overview
//! Sessions live in a sharded, lock-guarded map (read-heavy, so each shard
//! uses reader-writer semantics) and are mirrored into the Processing Store
//! on every transition. The lifecycle is `active -> (expired | closed)`;
//! expiry is inclusive at the TTL boundary, close wins over touch on a race
//! (both serialize on the shard lock, and a closed session refuses touches),
//! and expired sessions are never revived. Each session owns a root
//! cancellation signal; expiry and close latch it, canceling every task
//! derived from the session.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::hash::Hasher;
use std::hash::RandomState;
use std::sync::Arc;
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
use phi_gate_core::CorrelationId;
use phi_gate_core::FaultKind;
use phi_gate_core::InputType;
use phi_gate_core::ProcessingStore;
use phi_gate_core::SessionId;
use phi_gate_core::SessionOutcome;
use phi_gate_core::SessionRecord;
use phi_gate_core::SessionSnapshot;
use phi_gate_core::SessionState;
use phi_gate_core::StoreError;
use phi_gate_core::TokenId;
use thiserror::Error;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the Session Manager.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session identifier is unknown.
    #[error("session not found")]
    NotFound,
    /// Session is not active (expired sessions are never revived).
    #[error("session is {0}")]
    NotActive(&'static str),
    /// Store mirror failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classified for SessionError {
    fn fault_kind(&self) -> FaultKind {
        match self {
            Self::NotFound | Self::NotActive(_) => FaultKind::BusinessConflict,
            Self::Store(inner) => inner.fault_kind(),
        }
    }
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Number of shards in the session map.
const SHARD_COUNT: usize = 16;

/// One live session with its cancellation root.
struct LiveSession {
    /// Current record.
    record: SessionRecord,
    /// Root cancellation signal; latched on expiry and close.
    cancel: CancelSignal,
}

/// Sharded session manager with a 1 Hz expiry sweeper.
///
/// # Invariants
/// - `state = active` implies the TTL has not elapsed at the last sweep or
///   access; accesses check the boundary inclusively themselves.
/// - Lock order: session shard first, then any store call, never inverted.
pub struct SessionManager {
    /// Sharded map of live sessions.
    shards: Vec<RwLock<HashMap<SessionId, LiveSession>>>,
    /// Shard selector.
    hasher: RandomState,
    /// Processing Store mirror.
    processing: Arc<dyn ProcessingStore>,
    /// Audit log.
    audit: Arc<dyn AuditLog>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Hard TTL in milliseconds.
    ttl_ms: u64,
}

impl SessionManager {
    /// Creates a manager over its store, audit log, clock, and TTL.
    #[must_use]
    pub fn new(
        processing: Arc<dyn ProcessingStore>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        ttl_ms: u64,
    ) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect();
        Self {
            shards,
            hasher: RandomState::new(),
            processing,
            audit,
            clock,
            ttl_ms,
        }
    }

    /// Creates a new active session keyed to a token.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] when the mirror write fails.
    pub fn create(
        &self,
        token_id: TokenId,
        input_type: InputType,
        audit_trail_id: CorrelationId,
    ) -> Result<SessionSnapshot, SessionError> {
        let now = self.clock.now();
        let record = SessionRecord {
            session_id: SessionId::new(format!("sess-{}", Uuid::new_v4())),
            token_id,
            created_at: now,
            last_touched_at: now,
            state: SessionState::Active,
            input_type,
            audit_trail_id,
            outcome: None,
        };
        self.processing.upsert_session(&record)?;
        let snapshot = record.snapshot();
        {
            let mut shard = self.write_shard(&record.session_id)?;
            shard.insert(
                record.session_id.clone(),
                LiveSession {
                    record,
                    cancel: CancelSignal::new(),
                },
            );
        }
        self.record_audit(&snapshot, AuditAction::SessionCreated, AuditOutcome::Ok, None);
        Ok(snapshot)
    }

    /// Resets the idle clock of an active session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions,
    /// [`SessionError::NotActive`] once the session expired or closed, and
    /// [`SessionError::Store`] when the mirror write fails.
    pub fn touch(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let now = self.clock.now();
        let record = {
            let mut shard = self.write_shard(session_id)?;
            let live = shard.get_mut(session_id).ok_or(SessionError::NotFound)?;
            if live.record.state != SessionState::Active {
                return Err(SessionError::NotActive(live.record.state.as_str()));
            }
            if live.record.ttl_elapsed(now, self.ttl_ms) {
                // Expired but not yet swept; expire in place rather than
                // extending a lapsed envelope.
                return Err(self.expire_in_place(live));
            }
            live.record.last_touched_at = now;
            live.record.clone()
        };
        self.processing.upsert_session(&record)?;
        Ok(())
    }

    /// Returns a read-only snapshot of a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions.
    pub fn snapshot(&self, session_id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        let shard = self.read_shard(session_id)?;
        let live = shard.get(session_id).ok_or(SessionError::NotFound)?;
        Ok(live.record.snapshot())
    }

    /// Returns a child of the session's cancellation root for a task.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions.
    pub fn cancel_scope(&self, session_id: &SessionId) -> Result<CancelSignal, SessionError> {
        let shard = self.read_shard(session_id)?;
        let live = shard.get(session_id).ok_or(SessionError::NotFound)?;
        Ok(live.cancel.child())
    }

    /// Finalizes an active session with an outcome. Close wins over touch;
    /// a session that already expired cannot be closed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions,
    /// [`SessionError::NotActive`] for expired or already-closed sessions,
    /// and [`SessionError::Store`] when the mirror write fails.
    pub fn close(
        &self,
        session_id: &SessionId,
        outcome: SessionOutcome,
    ) -> Result<(), SessionError> {
        let record = {
            let mut shard = self.write_shard(session_id)?;
            let live = shard.get_mut(session_id).ok_or(SessionError::NotFound)?;
            if live.record.state != SessionState::Active {
                return Err(SessionError::NotActive(live.record.state.as_str()));
            }
            live.record.state = SessionState::Closed;
            live.record.outcome = Some(outcome);
            live.cancel.cancel();
            live.record.clone()
        };
        self.processing.upsert_session(&record)?;
        self.record_audit(
            &record.snapshot(),
            AuditAction::SessionClosed,
            AuditOutcome::Ok,
            Some(outcome.as_str().to_string()),
        );
        info!(session = %record.session_id, outcome = outcome.as_str(), "session closed");
        Ok(())
    }

    /// Expires every active session past its TTL. Returns the expired
    /// snapshots so callers can release held task slots.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] when a mirror write fails; sessions
    /// already expired in memory stay expired.
    pub fn sweep(&self) -> Result<Vec<SessionSnapshot>, SessionError> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for shard in &self.shards {
            let mut guard = shard.write().map_err(|_| {
                SessionError::Store(StoreError::Unavailable(
                    "session shard lock poisoned".to_string(),
                ))
            })?;
            for live in guard.values_mut() {
                if live.record.state == SessionState::Active
                    && live.record.ttl_elapsed(now, self.ttl_ms)
                {
                    live.record.state = SessionState::Expired;
                    live.cancel.cancel();
                    expired.push(live.record.clone());
                }
            }
        }
        for record in &expired {
            self.processing.upsert_session(record)?;
            self.record_audit(
                &record.snapshot(),
                AuditAction::SessionExpired,
                AuditOutcome::Expired,
                None,
            );
        }
        Ok(expired.iter().map(SessionRecord::snapshot).collect())
    }

    /// Runs the expiry sweeper until the signal cancels, at most once per
    /// second.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancelSignal) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if cancel.is_canceled() {
                return;
            }
            match self.sweep() {
                Ok(expired) if !expired.is_empty() => {
                    info!(count = expired.len(), "sessions expired by sweep");
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "session sweep failed"),
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Expires one session under its shard lock, returning the caller error.
    fn expire_in_place(&self, live: &mut LiveSession) -> SessionError {
        live.record.state = SessionState::Expired;
        live.cancel.cancel();
        let record = live.record.clone();
        if let Err(error) = self.processing.upsert_session(&record) {
            warn!(%error, "failed to mirror in-place expiry");
        }
        self.record_audit(
            &record.snapshot(),
            AuditAction::SessionExpired,
            AuditOutcome::Expired,
            None,
        );
        SessionError::NotActive(SessionState::Expired.as_str())
    }

    /// Selects and write-locks the shard owning a session.
    fn write_shard(
        &self,
        session_id: &SessionId,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<SessionId, LiveSession>>, SessionError>
    {
        self.shards[self.shard_index(session_id)].write().map_err(|_| {
            SessionError::Store(StoreError::Unavailable("session shard lock poisoned".to_string()))
        })
    }

    /// Selects and read-locks the shard owning a session.
    fn read_shard(
        &self,
        session_id: &SessionId,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<SessionId, LiveSession>>, SessionError>
    {
        self.shards[self.shard_index(session_id)].read().map_err(|_| {
            SessionError::Store(StoreError::Unavailable("session shard lock poisoned".to_string()))
        })
    }

    /// Hashes a session identifier onto its shard.
    fn shard_index(&self, session_id: &SessionId) -> usize {
        let mut hasher = self.hasher.build_hasher();
        hasher.write(session_id.as_str().as_bytes());
        let shard_count = u64::try_from(SHARD_COUNT).unwrap_or(1);
        usize::try_from(hasher.finish() % shard_count).unwrap_or(0)
    }

    /// Emits one session audit record.
    fn record_audit(
        &self,
        snapshot: &SessionSnapshot,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        let record = AuditRecord {
            timestamp: self.clock.now(),
            actor_id: ActorId::new("session_manager"),
            token_id: Some(snapshot.token_id.clone()),
            action,
            component: Component::SessionManager,
            outcome,
            correlation_id: snapshot.audit_trail_id.clone(),
            detail,
        };
        if let Err(error) = self.audit.append(&record) {
            warn!(%error, action = record.action.as_str(), "audit append failed");
        }
    }
}
