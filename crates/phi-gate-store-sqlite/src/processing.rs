// crates/phi-gate-store-sqlite/src/processing.rs
// ============================================================================
// Module: Processing Store Adapter
// Description: SQLite persistence for tokenized projections and case records.
// Purpose: Own the tokenized zone; no column holds a natural-person identifier.
// Dependencies: phi-gate-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Every table in the Processing Store is keyed or foreign-keyed by
//! `token_id`. The adapter accepts only tokenized types, so hospital
//! identity cannot reach this database through the type system; the PHI
//! guard scan runs upstream in the Tokenization Service as the final check.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Mutex;

use phi_gate_core::AgeRange;
use phi_gate_core::AnatomicalLocation;
use phi_gate_core::CorrelationId;
use phi_gate_core::EvidenceLevel;
use phi_gate_core::GenderCategory;
use phi_gate_core::InputType;
use phi_gate_core::LppDetection;
use phi_gate_core::LppGrade;
use phi_gate_core::MedicalDecision;
use phi_gate_core::MedicalImage;
use phi_gate_core::ProcessingStore;
use phi_gate_core::SessionId;
use phi_gate_core::SessionOutcome;
use phi_gate_core::SessionRecord;
use phi_gate_core::SessionState;
use phi_gate_core::StoreError;
use phi_gate_core::Timestamp;
use phi_gate_core::TokenAlias;
use phi_gate_core::TokenId;
use phi_gate_core::TokenizedPatient;
use phi_gate_core::Urgency;
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

/// Processing Store schema, applied idempotently on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tokenized_patients (
    token_id TEXT PRIMARY KEY,
    patient_alias TEXT NOT NULL,
    age_range TEXT NOT NULL,
    gender_category TEXT NOT NULL,
    risk_factors TEXT NOT NULL,
    medical_conditions TEXT NOT NULL,
    token_expires_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    token_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    last_touched_at INTEGER NOT NULL,
    state TEXT NOT NULL,
    input_type TEXT NOT NULL,
    audit_trail_id TEXT NOT NULL,
    outcome TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_token ON sessions(token_id, created_at);
CREATE TABLE IF NOT EXISTS medical_images (
    token_id TEXT NOT NULL,
    url TEXT NOT NULL,
    content_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    registered_at INTEGER NOT NULL,
    PRIMARY KEY (token_id, content_hash)
);
CREATE TABLE IF NOT EXISTS lpp_detections (
    token_id TEXT NOT NULL,
    grade INTEGER NOT NULL,
    confidence REAL NOT NULL,
    location TEXT NOT NULL,
    model_version TEXT NOT NULL,
    detected_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_detections_token ON lpp_detections(token_id, grade);
CREATE TABLE IF NOT EXISTS medical_decisions (
    token_id TEXT NOT NULL,
    urgency_level TEXT NOT NULL,
    evidence_level TEXT NOT NULL,
    recommendations TEXT NOT NULL,
    guideline_refs TEXT NOT NULL,
    escalation_required INTEGER NOT NULL,
    follow_up_interval_hours INTEGER NOT NULL,
    justification_text TEXT NOT NULL,
    decided_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_token ON medical_decisions(token_id, decided_at);
";

// ============================================================================
// SECTION: Store
// ============================================================================

/// SQLite-backed Processing Store.
///
/// # Invariants
/// - Exclusively owns its database file, physically separate from the
///   Hospital Store.
pub struct SqliteProcessingStore {
    /// Serialized connection; calls are short and bounded.
    connection: Mutex<Connection>,
}

impl SqliteProcessingStore {
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
            .map_err(|_| StoreError::Unavailable("processing store lock poisoned".to_string()))?;
        operation(&guard)
    }
}

/// Raw session row prior to label resolution.
struct SessionRow {
    /// Parsed record with placeholder enums.
    record: SessionRecord,
    /// Stored state label.
    state_label: String,
    /// Stored input type label.
    input_label: String,
    /// Stored outcome label, when present.
    outcome_label: Option<String>,
}

/// Parses a session row.
fn session_from_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        record: SessionRecord {
            session_id: SessionId::new(row.get::<_, String>(0)?),
            token_id: TokenId::new(row.get::<_, String>(1)?),
            created_at: Timestamp::from_unix_millis(row.get(2)?),
            last_touched_at: Timestamp::from_unix_millis(row.get(3)?),
            state: SessionState::Active,
            input_type: InputType::Text,
            audit_trail_id: CorrelationId::new(row.get::<_, String>(6)?),
            outcome: None,
        },
        state_label: row.get(4)?,
        input_label: row.get(5)?,
        outcome_label: row.get(7)?,
    })
}

/// Finishes parsing a session row by resolving stored labels.
fn finish_session(raw: SessionRow) -> Result<SessionRecord, StoreError> {
    let mut record = raw.record;
    record.state = SessionState::parse(&raw.state_label)
        .ok_or_else(|| corrupt_label("state", &raw.state_label))?;
    record.input_type = InputType::parse(&raw.input_label)
        .ok_or_else(|| corrupt_label("input_type", &raw.input_label))?;
    record.outcome = match raw.outcome_label {
        None => None,
        Some(label) => match label.as_str() {
            "completed" => Some(SessionOutcome::Completed),
            "rejected" => Some(SessionOutcome::Rejected),
            "human_review" => Some(SessionOutcome::HumanReview),
            "aborted" => Some(SessionOutcome::Aborted),
            other => return Err(corrupt_label("outcome", other)),
        },
    };
    Ok(record)
}

impl ProcessingStore for SqliteProcessingStore {
    fn upsert_tokenized_patient(&self, projection: &TokenizedPatient) -> Result<(), StoreError> {
        let risk_factors =
            serde_json::to_string(&projection.risk_factors).map_err(map_json_error)?;
        let conditions =
            serde_json::to_string(&projection.medical_conditions).map_err(map_json_error)?;
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO tokenized_patients (token_id, patient_alias, age_range, \
                     gender_category, risk_factors, medical_conditions, token_expires_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(token_id) DO UPDATE SET \
                       patient_alias = excluded.patient_alias, \
                       age_range = excluded.age_range, \
                       gender_category = excluded.gender_category, \
                       risk_factors = excluded.risk_factors, \
                       medical_conditions = excluded.medical_conditions, \
                       token_expires_at = excluded.token_expires_at",
                    params![
                        projection.token_id.as_str(),
                        projection.patient_alias.as_str(),
                        projection.age_range.as_str(),
                        projection.gender_category.as_str(),
                        risk_factors,
                        conditions,
                        projection.token_expires_at.as_unix_millis(),
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn tokenized_patient(
        &self,
        token_id: &TokenId,
    ) -> Result<Option<TokenizedPatient>, StoreError> {
        self.with_connection(|connection| {
            let raw = connection
                .query_row(
                    "SELECT token_id, patient_alias, age_range, gender_category, risk_factors, \
                     medical_conditions, token_expires_at FROM tokenized_patients \
                     WHERE token_id = ?1",
                    params![token_id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, i64>(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(map_sqlite_error)?;
            let Some((token, alias, age, gender, risks, conditions, expires)) = raw else {
                return Ok(None);
            };
            Ok(Some(TokenizedPatient {
                token_id: TokenId::new(token),
                patient_alias: TokenAlias::new(alias),
                age_range: AgeRange::parse(&age).ok_or_else(|| corrupt_label("age_range", &age))?,
                gender_category: GenderCategory::parse(&gender)
                    .ok_or_else(|| corrupt_label("gender_category", &gender))?,
                risk_factors: serde_json::from_str(&risks).map_err(map_json_error)?,
                medical_conditions: serde_json::from_str(&conditions).map_err(map_json_error)?,
                token_expires_at: Timestamp::from_unix_millis(expires),
            }))
        })
    }

    fn insert_image(&self, image: &MedicalImage) -> Result<(), StoreError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO medical_images (token_id, url, content_type, content_hash, \
                     registered_at) VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(token_id, content_hash) DO NOTHING",
                    params![
                        image.token_id.as_str(),
                        image.url,
                        image.content_type,
                        image.content_hash,
                        image.registered_at.as_unix_millis(),
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn insert_detection(&self, detection: &LppDetection) -> Result<(), StoreError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO lpp_detections (token_id, grade, confidence, location, \
                     model_version, detected_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        detection.token_id.as_str(),
                        i64::from(detection.grade.get()),
                        detection.confidence,
                        detection.location.as_str(),
                        detection.model_version,
                        detection.detected_at.as_unix_millis(),
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn insert_decision(&self, decision: &MedicalDecision) -> Result<(), StoreError> {
        let recommendations =
            serde_json::to_string(&decision.recommendations).map_err(map_json_error)?;
        let references = serde_json::to_string(&decision.references).map_err(map_json_error)?;
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO medical_decisions (token_id, urgency_level, evidence_level, \
                     recommendations, guideline_refs, escalation_required, \
                     follow_up_interval_hours, justification_text, decided_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        decision.token_id.as_str(),
                        decision.urgency_level.as_str(),
                        decision.evidence_level.as_str(),
                        recommendations,
                        references,
                        i64::from(decision.escalation_required),
                        i64::from(decision.follow_up_interval_hours),
                        decision.justification_text,
                        decision.decided_at.as_unix_millis(),
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn open_high_grade_case(&self, token_id: &TokenId) -> Result<bool, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM lpp_detections \
                     WHERE token_id = ?1 AND grade >= 3)",
                    params![token_id.as_str()],
                    |row| row.get::<_, bool>(0),
                )
                .map_err(map_sqlite_error)
        })
    }

    fn upsert_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.with_connection(|connection| {
            connection
                .execute(
                    "INSERT INTO sessions (session_id, token_id, created_at, last_touched_at, \
                     state, input_type, audit_trail_id, outcome) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(session_id) DO UPDATE SET \
                       last_touched_at = excluded.last_touched_at, \
                       state = excluded.state, \
                       outcome = excluded.outcome",
                    params![
                        session.session_id.as_str(),
                        session.token_id.as_str(),
                        session.created_at.as_unix_millis(),
                        session.last_touched_at.as_unix_millis(),
                        session.state.as_str(),
                        session.input_type.as_str(),
                        session.audit_trail_id.as_str(),
                        session.outcome.map(SessionOutcome::as_str),
                    ],
                )
                .map_err(map_sqlite_error)?;
            Ok(())
        })
    }

    fn session(&self, session_id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT session_id, token_id, created_at, last_touched_at, state, \
                     input_type, audit_trail_id, outcome FROM sessions WHERE session_id = ?1",
                    params![session_id.as_str()],
                    session_from_row,
                )
                .optional()
                .map_err(map_sqlite_error)?
                .map(finish_session)
                .transpose()
        })
    }

    fn latest_session_for_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Option<SessionRecord>, StoreError> {
        self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT session_id, token_id, created_at, last_touched_at, state, \
                     input_type, audit_trail_id, outcome FROM sessions WHERE token_id = ?1 \
                     ORDER BY created_at DESC LIMIT 1",
                    params![token_id.as_str()],
                    session_from_row,
                )
                .optional()
                .map_err(map_sqlite_error)?
                .map(finish_session)
                .transpose()
        })
    }
}

// ============================================================================
// SECTION: Read Helpers
// ============================================================================

impl SqliteProcessingStore {
    /// Returns the decisions recorded for a token, oldest first. Used by
    /// verification tooling and tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails or a row is corrupt.
    pub fn decisions_for_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<MedicalDecision>, StoreError> {
        self.with_connection(|connection| {
            let mut statement = connection
                .prepare(
                    "SELECT token_id, urgency_level, evidence_level, recommendations, \
                     guideline_refs, escalation_required, follow_up_interval_hours, \
                     justification_text, decided_at FROM medical_decisions \
                     WHERE token_id = ?1 ORDER BY decided_at ASC",
                )
                .map_err(map_sqlite_error)?;
            let rows = statement
                .query_map(params![token_id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                    ))
                })
                .map_err(map_sqlite_error)?;
            let mut decisions = Vec::new();
            for row in rows {
                let (token, urgency, evidence, recs, refs, escalate, follow_up, text, decided) =
                    row.map_err(map_sqlite_error)?;
                decisions.push(MedicalDecision {
                    token_id: TokenId::new(token),
                    urgency_level: Urgency::parse(&urgency)
                        .ok_or_else(|| corrupt_label("urgency_level", &urgency))?,
                    evidence_level: match evidence.as_str() {
                        "A" => EvidenceLevel::A,
                        "B" => EvidenceLevel::B,
                        "C" => EvidenceLevel::C,
                        other => return Err(corrupt_label("evidence_level", other)),
                    },
                    recommendations: serde_json::from_str(&recs).map_err(map_json_error)?,
                    references: serde_json::from_str(&refs).map_err(map_json_error)?,
                    escalation_required: escalate != 0,
                    follow_up_interval_hours: u32::try_from(follow_up)
                        .map_err(|_| corrupt_label("follow_up_interval_hours", "negative"))?,
                    justification_text: text,
                    decided_at: Timestamp::from_unix_millis(decided),
                });
            }
            Ok(decisions)
        })
    }

    /// Returns every detection recorded for a token, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails or a row is corrupt.
    pub fn detections_for_token(
        &self,
        token_id: &TokenId,
    ) -> Result<Vec<LppDetection>, StoreError> {
        self.with_connection(|connection| {
            let mut statement = connection
                .prepare(
                    "SELECT token_id, grade, confidence, location, model_version, detected_at \
                     FROM lpp_detections WHERE token_id = ?1 ORDER BY detected_at ASC",
                )
                .map_err(map_sqlite_error)?;
            let rows = statement
                .query_map(params![token_id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })
                .map_err(map_sqlite_error)?;
            let mut detections = Vec::new();
            for row in rows {
                let (token, grade, confidence, location, model, detected) =
                    row.map_err(map_sqlite_error)?;
                let grade = u8::try_from(grade)
                    .ok()
                    .and_then(LppGrade::new)
                    .ok_or_else(|| corrupt_label("grade", "out_of_range"))?;
                detections.push(LppDetection {
                    token_id: TokenId::new(token),
                    grade,
                    confidence,
                    location: AnatomicalLocation::parse(&location)
                        .ok_or_else(|| corrupt_label("location", &location))?,
                    model_version: model,
                    detected_at: Timestamp::from_unix_millis(detected),
                });
            }
            Ok(detections)
        })
    }
}
