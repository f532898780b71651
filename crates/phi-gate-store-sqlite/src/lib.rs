// crates/phi-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: PHI Gate SQLite Stores
// Description: Durable store adapters backed by three separate SQLite files.
// Purpose: Persist hospital, processing, and audit records with WAL safety.
// Dependencies: phi-gate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Three store adapters, one database file each: the Hospital Store (PHI
//! zone), the Processing Store (tokenized zone), and the Audit Log. Physical
//! separation is a deployment invariant; the adapters never share a
//! connection, and only the Tokenization Service composes a hospital adapter
//! with a processing adapter. Writes are idempotent by primary key; loads
//! fail closed on rows that no longer parse.
//!
//! Security posture: database contents are untrusted on load; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Append-only audit log adapter.
pub mod audit;
/// Hospital Store adapter (PHI zone).
pub mod hospital;
/// Processing Store adapter (tokenized zone).
pub mod processing;

pub use audit::SqliteAuditLog;
pub use hospital::SqliteHospitalStore;
pub use processing::SqliteProcessingStore;

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

use std::path::Path;

use phi_gate_core::StoreError;
use rusqlite::Connection;
use rusqlite::ErrorCode;

/// Default busy timeout applied to every connection (ms).
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Opens a database file with WAL journaling and a busy timeout.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] when the file cannot be opened or the
/// pragmas fail.
pub(crate) fn open_database(path: &Path) -> Result<Connection, StoreError> {
    let connection = Connection::open(path).map_err(map_sqlite_error)?;
    connection
        .busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
        .map_err(map_sqlite_error)?;
    connection
        .pragma_update(None, "journal_mode", "wal")
        .map_err(map_sqlite_error)?;
    connection
        .pragma_update(None, "synchronous", "full")
        .map_err(map_sqlite_error)?;
    Ok(connection)
}

/// Maps a `SQLite` error onto the store error taxonomy.
pub(crate) fn map_sqlite_error(error: rusqlite::Error) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(inner, _) => match inner.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen => {
                StoreError::Unavailable(error.to_string())
            }
            ErrorCode::ConstraintViolation => StoreError::Constraint(error.to_string()),
            ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase => {
                StoreError::Corrupt(error.to_string())
            }
            _ => StoreError::Unavailable(error.to_string()),
        },
        _ => StoreError::Serialization(error.to_string()),
    }
}

/// Maps a JSON (de)serialization error onto the store error taxonomy.
pub(crate) fn map_json_error(error: serde_json::Error) -> StoreError {
    StoreError::Serialization(error.to_string())
}

/// Fails closed when a stored label no longer parses.
pub(crate) fn corrupt_label(column: &str, label: &str) -> StoreError {
    StoreError::Corrupt(format!("unparseable {column} label: {label}"))
}
