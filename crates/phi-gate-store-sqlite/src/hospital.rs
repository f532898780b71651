// crates/phi-gate-store-sqlite/src/hospital.rs
// ============================================================================
// Module: Hospital Store Adapter
// Description: SQLite persistence for patients and tokenization requests.
// Purpose: Own the PHI zone exclusively; no tokenized-zone data lives here.
// Dependencies: phi-gate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! The Hospital Store holds [`HospitalPatient`] and [`TokenizationRequest`]
//! rows. `token_id` is uniquely indexed so the two-phase tokenization write
//! can recover by token alone. Request inserts are idempotent by token
//! identifier; replays of phase one are absorbed without duplication.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Mutex;

use phi_gate_core::ApprovalStatus;
use phi_gate_core::HospitalMrn;
use phi_gate_core::HospitalPatient;
use phi_gate_core::HospitalStore;
use phi_gate_core::PatientId;
use phi_gate_core::RequestId;
use phi_gate_core::StoreError;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizationRequest;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;

use crate::corrupt_label;
use crate::map_json_error;
use crate::map_sqlite_error;
use crate::open_database;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Hospital Store schema, applied idempotently on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hospital_patients (
    patient_id TEXT PRIMARY KEY,
    hospital_mrn TEXT NOT NULL UNIQUE,
    full_name TEXT NOT NULL,
    date_of_birth TEXT NOT NULL,
    phone_number TEXT NOT NULL,
    chronic_conditions TEXT NOT NULL,
    attending_physician TEXT NOT NULL,
    ward_location TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tokenization_requests (
    request_id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES hospital_patients(patient_id),
    token_id TEXT NOT NULL UNIQUE,
    token_alias TEXT NOT NULL,
    requesting_system TEXT NOT NULL,
    approval_status TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_requests_pair
    ON tokenization_requests(patient_id, requesting_system);
CREATE INDEX IF NOT EXISTS idx_requests_status
    ON tokenization_requests(approval_status, created_at);
";

// ============================================================================
// SECTION: Store
// ============================================================================

/// SQLite-backed Hospital Store.
///
/// # Invariants
/// - Exclusively owns its database file; never opened by processing-zone
///   components.
pub struct SqliteHospitalStore {
    /// Serialized connection; calls are short and bounded.
    connection: Mutex<Connection>,
}

impl SqliteHospitalStore {
    /// Opens (and if necessary initializes) the store.
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
            .map_err(|_| StoreError::Unavailable("hospital store lock poisoned".to_string()))?;
        operation(&guard)
    }
}

/// Parses a patient row.
fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<(HospitalPatient, String)> {
    Ok((
        HospitalPatient {
            patient_id: PatientId::new(row.get::<_, String>(0)?),
            hospital_mrn: HospitalMrn::new(row.get::<_, String>(1)?),
            full_name: row.get(2)?,
            date_of_birth: row.get(3)?,
            phone_number: row.get(4)?,
            chronic_conditions: std::collections::BTreeSet::new(),
            attending_physician: row.get(6)?,
            ward_location: row.get(7)?,
        },
        row.get::<_, String>(5)?,
    ))
}

/// Parses a tokenization request row.
fn request_from_row(row: &Row<'_>) -> rusqlite::Result<(TokenizationRequest, String)> {
    Ok((
        TokenizationRequest {
            request_id: RequestId::new(row.get::<_, String>(0)?),
            patient_id: PatientId::new(row.get::<_, String>(1)?),
            token_id: TokenId::new(row.get::<_, String>(2)?),
            token_alias: TokenAlias::new(row.get::<_, String>(3)?),
            requesting_system: row.get(4)?,
            approval_status: ApprovalStatus::Pending,
            expires_at: Timestamp::from_unix_millis(row.get(6)?),
            created_at: Timestamp::from_unix_millis(row.get(7)?),
        },
        row.get::<_, String>(5)?,
    ))
}

/// Finishes parsing a request row by resolving the status label.
fn finish_request(
    (mut request, status_label): (TokenizationRequest, String),
) -> Result<TokenizationRequest, StoreError> {
    request.approval_status = ApprovalStatus::parse(&status_label)
        .ok_or_else(|| corrupt_label("approval_status", &status_label))?;
    Ok(request)
}

/// Finishes parsing a patient row by resolving the conditions payload.
fn finish_patient(
    (mut patient, conditions_json): (HospitalPatient, String),
) -> Result<HospitalPatient, StoreError> {
    patient.chronic_conditions = serde_json::from_str(&conditions_json).map_err(map_json_error)?;
    Ok(patient)
}

impl HospitalStore for SqliteHospitalStore {
    fn insert_patient(&self, patient: &HospitalPatient) -> Result<(), StoreError> {
        let conditions =
            serde_json::to_string(&patient.chronic_conditions).map_err(map_json_error)?;
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO hospital_patients (patient_id, hospital_mrn, full_name, \
                     date_of_birth, phone_number, chronic_conditions, attending_physician, \
                     ward_location) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        patient.patient_id.as_str(),
                        patient.hospital_mrn.as_str(),
                        patient.full_name,
                        patient.date_of_birth,
                        patient.phone_number,
                        conditions,
                        patient.attending_physician,
                        patient.ward_location,
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn patient_by_mrn(&self, mrn: &HospitalMrn) -> Result<Option<HospitalPatient>, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT patient_id, hospital_mrn, full_name, date_of_birth, phone_number, \
                     chronic_conditions, attending_physician, ward_location \
                     FROM hospital_patients WHERE hospital_mrn = ?1",
                    params![mrn.as_str()],
                    patient_from_row,
                )
                .optional()
                .map_err(map_sqlite_error)?
                .map(finish_patient)
                .transpose()
        })
    }

    fn patient_by_id(
        &self,
        patient_id: &PatientId,
    ) -> Result<Option<HospitalPatient>, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT patient_id, hospital_mrn, full_name, date_of_birth, phone_number, \
                     chronic_conditions, attending_physician, ward_location \
                     FROM hospital_patients WHERE patient_id = ?1",
                    params![patient_id.as_str()],
                    patient_from_row,
                )
                .optional()
                .map_err(map_sqlite_error)?
                .map(finish_patient)
                .transpose()
        })
    }

    fn insert_request(&self, request: &TokenizationRequest) -> Result<(), StoreError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO tokenization_requests (request_id, patient_id, token_id, \
                     token_alias, requesting_system, approval_status, expires_at, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(token_id) DO NOTHING",
                    params![
                        request.request_id.as_str(),
                        request.patient_id.as_str(),
                        request.token_id.as_str(),
                        request.token_alias.as_str(),
                        request.requesting_system,
                        request.approval_status.as_str(),
                        request.expires_at.as_unix_millis(),
                        request.created_at.as_unix_millis(),
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn update_request_status(
        &self,
        token_id: &TokenId,
        status: ApprovalStatus,
    ) -> Result<(), StoreError> {
        self.with_connection(|connection| {
            let updated = connection
                .execute(
                    "UPDATE tokenization_requests SET approval_status = ?1 WHERE token_id = ?2",
                    params![status.as_str(), token_id.as_str()],
                )
                .map_err(map_sqlite_error)?;
            if updated == 0 {
                return Err(StoreError::Constraint(format!(
                    "no tokenization request for token {token_id}"
                )));
            }
            Ok(())
        })
    }

    fn active_request(
        &self,
        patient_id: &PatientId,
        requesting_system: &str,
        now: Timestamp,
    ) -> Result<Option<TokenizationRequest>, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT request_id, patient_id, token_id, token_alias, requesting_system, \
                     approval_status, expires_at, created_at FROM tokenization_requests \
                     WHERE patient_id = ?1 AND requesting_system = ?2 \
                       AND approval_status = 'approved' AND expires_at > ?3 \
                     ORDER BY created_at DESC LIMIT 1",
                    params![patient_id.as_str(), requesting_system, now.as_unix_millis()],
                    request_from_row,
                )
                .optional()
                .map_err(map_sqlite_error)?
                .map(finish_request)
                .transpose()
        })
    }

    fn request_by_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Option<TokenizationRequest>, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT request_id, patient_id, token_id, token_alias, requesting_system, \
                     approval_status, expires_at, created_at FROM tokenization_requests \
                     WHERE token_id = ?1",
                    params![token_id.as_str()],
                    request_from_row,
                )
                .optional()
                .map_err(map_sqlite_error)?
                .map(finish_request)
                .transpose()
        })
    }

    fn pending_requests_before(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<TokenizationRequest>, StoreError> {
        self.with_connection(|connection| {
            let mut statement = connection
                .prepare(
                    "SELECT request_id, patient_id, token_id, token_alias, requesting_system, \
                     approval_status, expires_at, created_at FROM tokenization_requests \
                     WHERE approval_status = 'pending' AND created_at <= ?1 \
                     ORDER BY created_at ASC",
                )
                .map_err(map_sqlite_error)?;
            let rows = statement
                .query_map(params![cutoff.as_unix_millis()], request_from_row)
                .map_err(map_sqlite_error)?;
            let mut requests = Vec::new();
            for row in rows {
                requests.push(finish_request(row.map_err(map_sqlite_error)?)?);
            }
            Ok(requests)
        })
    }
}
