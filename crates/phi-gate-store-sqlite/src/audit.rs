// crates/phi-gate-store-sqlite/src/audit.rs
// ============================================================================
// Module: Audit Log Adapter
// Description: Append-only SQLite audit log keyed by token.
// Purpose: Record every state transition immutably with monotonic entry ids.
// Dependencies: phi-gate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! The audit log is append-only: the adapter exposes no update or single-row
//! delete. Entries reference only token identifiers and stable labels. The
//! two supported reads are by token (authorized roles) and by time range
//! (administrative); retention pruning removes whole prefixes older than the
//! configured cutoff and never touches younger entries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Mutex;

use phi_gate_core::ActorId;
use phi_gate_core::AuditEntry;
use phi_gate_core::AuditEntryId;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditRecord;
use phi_gate_core::CorrelationId;
use phi_gate_core::StoreError;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenId;
use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;

use crate::corrupt_label;
use crate::map_sqlite_error;
use crate::open_database;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Audit Log schema, applied idempotently on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_entries (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    actor_id TEXT NOT NULL,
    token_id TEXT,
    action TEXT NOT NULL,
    component TEXT NOT NULL,
    outcome TEXT NOT NULL,
    correlation_id TEXT NOT NULL,
    detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_audit_token ON audit_entries(token_id, entry_id);
CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_entries(timestamp);
";

// ============================================================================
// SECTION: Log
// ============================================================================

/// SQLite-backed append-only audit log.
///
/// # Invariants
/// - Entries are immutable once appended; `entry_id` is strictly increasing.
pub struct SqliteAuditLog {
    /// Serialized connection; appends are short and bounded.
    connection: Mutex<Connection>,
}

impl SqliteAuditLog {
    /// Opens (and if necessary initializes) the log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = open_database(path)?;
        connection.execute_batch(SCHEMA).map_err(map_sqlite_error)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Runs one bounded call against the connection.
    fn with_connection<T>(
        &self,
        operation: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| StoreError::Unavailable("audit log lock poisoned".to_string()))?;
        operation(&guard)
    }
}

/// Collects raw rows into parsed entries, failing closed on corruption.
fn collect_entries(
    rows: Vec<rusqlite::Result<RawEntry>>,
) -> Result<Vec<AuditEntry>, StoreError> {
    let mut entries = Vec::new();
    for row in rows {
        entries.push(finish_entry(row.map_err(map_sqlite_error)?)?);
    }
    Ok(entries)
}

/// Raw audit row prior to label resolution.
struct RawEntry {
    /// Monotonic entry identifier.
    entry_id: i64,
    /// Emission instant in epoch millis.
    timestamp: i64,
    /// Actor label.
    actor: String,
    /// Token identifier, when present.
    token: Option<String>,
    /// Action label.
    action: String,
    /// Component label.
    component: String,
    /// Outcome label.
    outcome: String,
    /// Correlation identifier.
    correlation: String,
    /// Optional detail label.
    detail: Option<String>,
}

/// Parses a raw audit row.
fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        entry_id: row.get(0)?,
        timestamp: row.get(1)?,
        actor: row.get(2)?,
        token: row.get(3)?,
        action: row.get(4)?,
        component: row.get(5)?,
        outcome: row.get(6)?,
        correlation: row.get(7)?,
        detail: row.get(8)?,
    })
}

/// Finishes parsing a raw row by resolving the stored labels.
fn finish_entry(raw: RawEntry) -> Result<AuditEntry, StoreError> {
    let action = serde_json::from_value(serde_json::Value::String(raw.action.clone()))
        .map_err(|_| corrupt_label("action", &raw.action))?;
    let component = serde_json::from_value(serde_json::Value::String(raw.component.clone()))
        .map_err(|_| corrupt_label("component", &raw.component))?;
    let outcome = serde_json::from_value(serde_json::Value::String(raw.outcome.clone()))
        .map_err(|_| corrupt_label("outcome", &raw.outcome))?;
    let entry_id = u64::try_from(raw.entry_id)
        .map_err(|_| StoreError::Corrupt("negative audit entry id".to_string()))?;
    Ok(AuditEntry {
        entry_id: AuditEntryId::new(entry_id),
        record: AuditRecord {
            timestamp: Timestamp::from_unix_millis(raw.timestamp),
            actor_id: ActorId::new(raw.actor),
            token_id: raw.token.map(TokenId::new),
            action,
            component,
            outcome,
            correlation_id: CorrelationId::new(raw.correlation),
            detail: raw.detail,
        },
    })
}

/// Columns selected for every audit read.
const SELECT_COLUMNS: &str = "SELECT entry_id, timestamp, actor_id, token_id, action, \
                              component, outcome, correlation_id, detail FROM audit_entries";

impl AuditLog for SqliteAuditLog {
    fn append(&self, record: &AuditRecord) -> Result<AuditEntryId, StoreError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO audit_entries (timestamp, actor_id, token_id, action, \
                     component, outcome, correlation_id, detail) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        record.timestamp.as_unix_millis(),
                        record.actor_id.as_str(),
                        record.token_id.as_ref().map(TokenId::as_str),
                        record.action.as_str(),
                        record.component.as_str(),
                        record.outcome.as_str(),
                        record.correlation_id.as_str(),
                        record.detail,
                    ],
                )
                .map_err(map_sqlite_error)?;
            let entry_id = u64::try_from(connection.last_insert_rowid())
                .map_err(|_| StoreError::Corrupt("negative audit entry id".to_string()))?;
            Ok(AuditEntryId::new(entry_id))
        })
    }

    fn entries_for_token(&self, token_id: &TokenId) -> Result<Vec<AuditEntry>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE token_id = ?1 ORDER BY entry_id ASC");
        self.with_connection(|connection| {
            let mut statement = connection.prepare(&sql).map_err(map_sqlite_error)?;
            let rows = statement
                .query_map(params![token_id.as_str()], raw_from_row)
                .map_err(map_sqlite_error)?
                .collect::<Vec<_>>();
            collect_entries(rows)
        })
    }

    fn entries_in_range(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY entry_id ASC"
        );
        self.with_connection(|connection| {
            let mut statement = connection.prepare(&sql).map_err(map_sqlite_error)?;
            let rows = statement
                .query_map(params![from.as_unix_millis(), to.as_unix_millis()], raw_from_row)
                .map_err(map_sqlite_error)?
                .collect::<Vec<_>>();
            collect_entries(rows)
        })
    }

    fn prune_older_than(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        self.with_connection(|connection| {
            let removed = connection
                .execute(
                    "DELETE FROM audit_entries WHERE timestamp < ?1",
                    params![cutoff.as_unix_millis()],
                )
                .map_err(map_sqlite_error)?;
            Ok(u64::try_from(removed).unwrap_or(u64::MAX))
        })
    }
}
