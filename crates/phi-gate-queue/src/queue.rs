// crates/phi-gate-queue/src/queue.rs
// ============================================================================
// Module: Encrypted Input Queue
// Description: Durable, encrypted, per-source FIFO buffer with leases.
// Purpose: Hold packaged inputs at rest until the Dispatcher consumes them.
// Dependencies: phi-gate-core, rusqlite, serde_json, tracing, crate::keys
// ============================================================================

//! ## Overview
//! The Input Queue is a durable buffer of encrypted records
//! `{processing_id, enqueued_at, deadline, ciphertext, nonce}`; records are
//! appended and tombstoned on ack or expiry, never updated in place.
//! Ordering is FIFO per source with no global order: an entry is only
//! delivered once no earlier entry of the same source is in flight. Each
//! delivered entry carries a visibility lease; a consumer that crashes lets
//! the lease lapse and the entry becomes deliverable again. Enqueue is
//! at-least-once and absorbs replays by processing identifier.
//!
//! Security posture: a failed decryption is a contract violation; the entry
//! is tombstoned and a security audit entry is emitted; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use phi_gate_core::ActorId;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::Classified;
use phi_gate_core::Clock;
use phi_gate_core::Component;
use phi_gate_core::CorrelationId;
use phi_gate_core::FaultKind;
use phi_gate_core::InputPackage;
use phi_gate_core::ProcessingId;
use phi_gate_core::StoreError;
use phi_gate_core::Timestamp;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;
use tracing::warn;

use crate::keys::KeyError;
use crate::keys::QueueKeyHolder;
use crate::keys::SealedEntry;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the Input Queue.
///
/// # Invariants
/// - `Decryption` is non-retryable; the offending entry is already
///   tombstoned when the error surfaces.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying storage failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Entry failed authenticated decryption.
    #[error("queue entry failed decryption: {0}")]
    Decryption(ProcessingId),
    /// Package failed to serialize for sealing.
    #[error("queue serialization failure: {0}")]
    Serialization(String),
}

impl Classified for QueueError {
    fn fault_kind(&self) -> FaultKind {
        match self {
            Self::Store(inner) => inner.fault_kind(),
            Self::Decryption(_) | Self::Serialization(_) => FaultKind::NonRetryable,
        }
    }
}

/// Maps key-holder failures onto queue errors.
fn map_key_error(error: KeyError, processing_id: &ProcessingId) -> QueueError {
    match error {
        KeyError::Integrity => QueueError::Decryption(processing_id.clone()),
        KeyError::Lock => {
            QueueError::Store(StoreError::Unavailable("key holder lock poisoned".to_string()))
        }
    }
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Input Queue schema, applied idempotently on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS input_entries (
    processing_id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL,
    deadline INTEGER NOT NULL,
    key_id INTEGER NOT NULL,
    nonce BLOB NOT NULL,
    ciphertext BLOB NOT NULL,
    lease_until INTEGER,
    tombstoned INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_entries_order ON input_entries(tombstoned, enqueued_at);
CREATE INDEX IF NOT EXISTS idx_entries_source ON input_entries(source_id, tombstoned);
";

// ============================================================================
// SECTION: Queue
// ============================================================================

/// Entry delivered to a consumer under a visibility lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedEntry {
    /// Decrypted input package.
    pub package: InputPackage,
    /// Enqueue instant.
    pub enqueued_at: Timestamp,
    /// Hard processing deadline.
    pub deadline: Timestamp,
}

/// Durable, encrypted input queue.
///
/// # Invariants
/// - At most one consumer holds an unexpired lease on an entry.
/// - Per-source FIFO: delivery order within one source matches enqueue order.
pub struct InputQueue {
    /// Serialized connection; calls are short and bounded.
    connection: Mutex<Connection>,
    /// Encryption key holder.
    keys: Arc<QueueKeyHolder>,
    /// Audit log for expiry and security entries.
    audit: Arc<dyn AuditLog>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Entry deadline in milliseconds.
    deadline_ms: u64,
    /// Visibility lease in milliseconds.
    lease_ms: u64,
}

impl InputQueue {
    /// Opens (and if necessary initializes) the queue database.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the database cannot be opened.
    pub fn open(
        path: &Path,
        keys: Arc<QueueKeyHolder>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        deadline_ms: u64,
        lease_ms: u64,
    ) -> Result<Self, QueueError> {
        let connection = Connection::open(path)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        connection
            .pragma_update(None, "journal_mode", "wal")
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        connection
            .execute_batch(SCHEMA)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self {
            connection: Mutex::new(connection),
            keys,
            audit,
            clock,
            deadline_ms,
            lease_ms,
        })
    }

    /// Runs one bounded call against the connection.
    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let guard = self.connection.lock().map_err(|_| {
            QueueError::Store(StoreError::Unavailable("input queue lock poisoned".to_string()))
        })?;
        operation(&guard)
    }

    /// Appends one package, sealing it at rest. Replays of the same
    /// processing identifier are absorbed without effect.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on sealing or storage failure.
    pub fn enqueue(&self, package: &InputPackage) -> Result<(), QueueError> {
        let plaintext = serde_json::to_vec(package)
            .map_err(|err| QueueError::Serialization(err.to_string()))?;
        let sealed = self
            .keys
            .seal(&plaintext, package.processing_id.as_str().as_bytes())
            .map_err(|err| map_key_error(err, &package.processing_id))?;
        let now = self.clock.now();
        let deadline = now.saturating_add_millis(self.deadline_ms);
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO input_entries (processing_id, source_id, enqueued_at, deadline, \
                     key_id, nonce, ciphertext) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(processing_id) DO NOTHING",
                    params![
                        package.processing_id.as_str(),
                        package.source_id.as_str(),
                        now.as_unix_millis(),
                        deadline.as_unix_millis(),
                        i64::from(sealed.key_id),
                        sealed.nonce,
                        sealed.ciphertext,
                    ],
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            Ok(())
        })
    }

    /// Delivers the oldest available entry whose source has nothing in
    /// flight, taking a visibility lease on it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Decryption`] when the entry fails its tag
    /// check (the entry is tombstoned first), or a storage failure.
    pub fn dequeue(&self) -> Result<Option<LeasedEntry>, QueueError> {
        let now = self.clock.now();
        let lease_until = now.saturating_add_millis(self.lease_ms);
        let candidate = self.with_connection(|connection| {
            let row = connection
                .query_row(
                    "SELECT processing_id, enqueued_at, deadline, key_id, nonce, ciphertext \
                     FROM input_entries \
                     WHERE tombstoned = 0 \
                       AND (lease_until IS NULL OR lease_until <= ?1) \
                       AND deadline > ?1 \
                       AND source_id NOT IN ( \
                         SELECT source_id FROM input_entries \
                         WHERE tombstoned = 0 AND lease_until > ?1) \
                     ORDER BY enqueued_at ASC, processing_id ASC LIMIT 1",
                    params![now.as_unix_millis()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, Vec<u8>>(4)?,
                            row.get::<_, Vec<u8>>(5)?,
                        ))
                    },
                )
                .optional()
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            let Some((processing_id, enqueued_at, deadline, key_id, nonce, ciphertext)) = row
            else {
                return Ok(None);
            };
            connection
                .execute(
                    "UPDATE input_entries SET lease_until = ?1 WHERE processing_id = ?2",
                    params![lease_until.as_unix_millis(), processing_id],
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            Ok(Some((processing_id, enqueued_at, deadline, key_id, nonce, ciphertext)))
        })?;

        let Some((processing_id, enqueued_at, deadline, key_id, nonce, ciphertext)) = candidate
        else {
            return Ok(None);
        };
        let processing_id = ProcessingId::new(processing_id);
        let sealed = SealedEntry {
            key_id: u32::try_from(key_id).unwrap_or(0),
            nonce,
            ciphertext,
        };
        let plaintext = match self.keys.open(&sealed, processing_id.as_str().as_bytes()) {
            Ok(plaintext) => plaintext,
            Err(error) => {
                self.quarantine(&processing_id);
                return Err(map_key_error(error, &processing_id));
            }
        };
        let package: InputPackage = match serde_json::from_slice(&plaintext) {
            Ok(package) => package,
            Err(error) => {
                self.quarantine(&processing_id);
                return Err(QueueError::Serialization(error.to_string()));
            }
        };
        Ok(Some(LeasedEntry {
            package,
            enqueued_at: Timestamp::from_unix_millis(enqueued_at),
            deadline: Timestamp::from_unix_millis(deadline),
        }))
    }

    /// Extends the lease on an in-flight entry (consumer heartbeat).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failure.
    pub fn extend_lease(&self, processing_id: &ProcessingId) -> Result<(), QueueError> {
        let lease_until = self.clock.now().saturating_add_millis(self.lease_ms);
        self.with_connection(|connection| {
            connection
                .execute(
                    "UPDATE input_entries SET lease_until = ?1 \
                     WHERE processing_id = ?2 AND tombstoned = 0",
                    params![lease_until.as_unix_millis(), processing_id.as_str()],
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            Ok(())
        })
    }

    /// Acknowledges an entry after successful processing (tombstone).
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failure.
    pub fn ack(&self, processing_id: &ProcessingId) -> Result<(), QueueError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "UPDATE input_entries SET tombstoned = 1 WHERE processing_id = ?1",
                    params![processing_id.as_str()],
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            Ok(())
        })
    }

    /// Releases the lease on an entry without acknowledging it, making it
    /// deliverable again immediately.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failure.
    pub fn release(&self, processing_id: &ProcessingId) -> Result<(), QueueError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "UPDATE input_entries SET lease_until = NULL \
                     WHERE processing_id = ?1 AND tombstoned = 0",
                    params![processing_id.as_str()],
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            Ok(())
        })
    }

    /// Tombstones entries past their deadline and audits each expiry.
    /// Returns the number of entries expired.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failure.
    pub fn sweep_expired(&self) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let expired = self.with_connection(|connection| {
            let mut statement = connection
                .prepare(
                    "SELECT processing_id FROM input_entries \
                     WHERE tombstoned = 0 AND deadline <= ?1",
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            let ids = statement
                .query_map(params![now.as_unix_millis()], |row| row.get::<_, String>(0))
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?
                .collect::<Result<Vec<String>, _>>()
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            for processing_id in &ids {
                connection
                    .execute(
                        "UPDATE input_entries SET tombstoned = 1 WHERE processing_id = ?1",
                        params![processing_id],
                    )
                    .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            }
            Ok(ids)
        })?;
        for processing_id in &expired {
            self.audit_expiry(processing_id, now);
        }
        Ok(u64::try_from(expired.len()).unwrap_or(u64::MAX))
    }

    /// Returns the number of live (neither acked nor expired) entries.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on storage failure.
    pub fn depth(&self) -> Result<u64, QueueError> {
        self.with_connection(|connection| {
            let count: i64 = connection
                .query_row(
                    "SELECT COUNT(*) FROM input_entries WHERE tombstoned = 0",
                    [],
                    |row| row.get(0),
                )
                .map_err(|err| QueueError::Store(StoreError::Unavailable(err.to_string())))?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    /// Tombstones an undecryptable entry and emits the security audit.
    fn quarantine(&self, processing_id: &ProcessingId) {
        if let Err(error) = self.ack(processing_id) {
            warn!(%error, "failed to tombstone undecryptable entry");
        }
        self.append_audit(AuditRecord {
            timestamp: self.clock.now(),
            actor_id: ActorId::new("input_queue"),
            token_id: None,
            action: AuditAction::SecurityViolation,
            component: Component::InputQueue,
            outcome: AuditOutcome::Escalated,
            correlation_id: CorrelationId::new(processing_id.as_str()),
            detail: Some("decryption_failure".to_string()),
        });
    }

    /// Emits the expiry audit for one tombstoned entry.
    fn audit_expiry(&self, processing_id: &str, now: Timestamp) {
        self.append_audit(AuditRecord {
            timestamp: now,
            actor_id: ActorId::new("input_queue"),
            token_id: None,
            action: AuditAction::InputExpired,
            component: Component::InputQueue,
            outcome: AuditOutcome::Expired,
            correlation_id: CorrelationId::new(processing_id),
            detail: None,
        });
    }

    /// Appends an audit record, logging (never masking) append failures.
    fn append_audit(&self, record: AuditRecord) {
        if let Err(error) = self.audit.append(&record) {
            warn!(%error, action = record.action.as_str(), "audit append failed");
        }
    }
}
