// crates/phi-gate-config/src/lib.rs
// ============================================================================
// Module: PHI Gate Configuration
// Description: Canonical configuration model, defaults, and validation.
// Purpose: Provide the single read-mostly runtime configuration structure.
// Dependencies: phi-gate-core, serde, thiserror, toml
// ============================================================================

//! ## Overview
//! The runtime reads one [`GateConfig`] structure at startup. Every tunable
//! enumerated by the system contract lives here with its documented default,
//! so a minimal TOML file configures a working deployment. `validate` rejects
//! zero or out-of-range values with field-named errors before any component
//! starts. There are no global mutable singletons beyond this structure and
//! the rotated encryption-key holder.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use phi_gate_core::QueueName;
use phi_gate_core::Stage;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors produced while loading or validating configuration.
///
/// # Invariants
/// - `Invalid` messages name the offending field.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("config read failure: {0}")]
    Io(String),
    /// Configuration file could not be parsed as TOML.
    #[error("config parse failure: {0}")]
    Parse(String),
    /// A field value is out of range or inconsistent.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Session lifecycle settings.
///
/// # Invariants
/// - `ttl_seconds` is greater than zero; the TTL boundary is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Hard session TTL in seconds.
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl_seconds(),
        }
    }
}

/// Returns the default session TTL (15 minutes).
const fn default_session_ttl_seconds() -> u64 {
    900
}

/// Input queue settings.
///
/// # Invariants
/// - `deadline_seconds` and `lease_seconds` are greater than zero.
/// - `max_media_bytes` caps a single media object before packaging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InputQueueConfig {
    /// Path of the encrypted queue database.
    pub path: PathBuf,
    /// Deployment salt for sender pseudonymization (a secret, distinct from
    /// the alias vocabulary salt).
    pub sender_salt: String,
    /// Hard entry deadline in seconds.
    #[serde(default = "default_input_deadline_seconds")]
    pub deadline_seconds: u64,
    /// Visibility lease for dequeued entries, in seconds.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    /// Maximum size of a single media object in bytes.
    #[serde(default = "default_max_media_bytes")]
    pub max_media_bytes: u64,
}

/// Returns the default input deadline (15 minutes). Intentionally a separate
/// constant from the session TTL; deployments may diverge the two.
const fn default_input_deadline_seconds() -> u64 {
    900
}

/// Returns the default visibility lease (60 seconds).
const fn default_lease_seconds() -> u64 {
    60
}

/// Returns the default per-object media cap (25 MiB).
const fn default_max_media_bytes() -> u64 {
    25 * 1024 * 1024
}

/// Task retry and deadline settings.
///
/// # Invariants
/// - `max_attempts` is greater than zero.
/// - Stage deadline keys are stage labels; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskConfig {
    /// Maximum delivery attempts before escalation.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base retry delay in seconds.
    #[serde(default = "default_retry_delay_base_seconds")]
    pub retry_delay_base_seconds: u64,
    /// Per-stage deadline overrides in seconds, keyed by stage label.
    #[serde(default = "default_stage_deadlines")]
    pub deadline_seconds_by_stage: BTreeMap<String, u64>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_base_seconds: default_retry_delay_base_seconds(),
            deadline_seconds_by_stage: default_stage_deadlines(),
        }
    }
}

/// Returns the default attempt cap.
const fn default_max_attempts() -> u32 {
    3
}

/// Returns the default retry base delay (60 seconds).
const fn default_retry_delay_base_seconds() -> u64 {
    60
}

/// Returns the default per-stage deadlines (180-300 seconds by stage).
fn default_stage_deadlines() -> BTreeMap<String, u64> {
    BTreeMap::from([
        (Stage::ImagePrep.as_str().to_string(), 180),
        (Stage::Detection.as_str().to_string(), 300),
        (Stage::Decision.as_str().to_string(), 180),
        (Stage::Notification.as_str().to_string(), 180),
        (Stage::AuditFinalize.as_str().to_string(), 180),
        (Stage::HumanReview.as_str().to_string(), 300),
    ])
}

impl TaskConfig {
    /// Returns the deadline for a stage in seconds, falling back to the
    /// detection ceiling when no override exists.
    #[must_use]
    pub fn stage_deadline_seconds(&self, stage: Stage) -> u64 {
        self.deadline_seconds_by_stage.get(stage.as_str()).copied().unwrap_or(300)
    }
}

/// Worker pool settings.
///
/// # Invariants
/// - `pool_size` and `prefetch` are greater than zero.
/// - `min_share_percent` lies in `[1, 100]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Tasks prefetched per worker.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,
    /// Minimum concurrency share reserved per queue, in percent.
    #[serde(default = "default_min_share_percent")]
    pub min_share_percent: u8,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            prefetch: default_prefetch(),
            min_share_percent: default_min_share_percent(),
        }
    }
}

/// Returns the default worker pool size.
const fn default_pool_size() -> usize {
    4
}

/// Returns the default prefetch multiplier.
const fn default_prefetch() -> usize {
    1
}

/// Returns the default reserved share per queue (10 percent).
const fn default_min_share_percent() -> u8 {
    10
}

/// Queue arrangement settings.
///
/// # Invariants
/// - `priority_order` is a permutation of the four queue labels.
/// - `high_water_mark` is greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueuesConfig {
    /// Strict priority order, highest first.
    #[serde(default = "default_priority_order")]
    pub priority_order: Vec<String>,
    /// In-flight count per queue above which enqueues block.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            priority_order: default_priority_order(),
            high_water_mark: default_high_water_mark(),
        }
    }
}

/// Returns the default strict priority order.
fn default_priority_order() -> Vec<String> {
    QueueName::PRIORITY_ORDER.iter().map(|queue| queue.as_str().to_string()).collect()
}

/// Returns the default per-queue high-water mark.
const fn default_high_water_mark() -> usize {
    64
}

/// Tokenization settings.
///
/// # Invariants
/// - `alias_vocabulary_salt` is non-empty; it is a deployment secret.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenizationConfig {
    /// Deployment salt for deterministic alias selection.
    pub alias_vocabulary_salt: String,
    /// Reconciliation grace window in seconds.
    #[serde(default = "default_reconciliation_grace_seconds")]
    pub reconciliation_grace_seconds: u64,
    /// Default token TTL in seconds when the caller does not pass one.
    #[serde(default = "default_token_ttl_seconds")]
    pub default_token_ttl_seconds: u64,
}

/// Returns the default reconciliation grace window (5 minutes).
const fn default_reconciliation_grace_seconds() -> u64 {
    300
}

/// Returns the default token TTL (30 days).
const fn default_token_ttl_seconds() -> u64 {
    30 * 24 * 60 * 60
}

/// Audit retention settings.
///
/// # Invariants
/// - `retention_days` is greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuditConfig {
    /// Retention window in days (default seven years).
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

/// Returns the default audit retention (2555 days).
const fn default_retention_days() -> u32 {
    2_555
}

/// Medical thresholds.
///
/// # Invariants
/// - `confidence_escalation_threshold` lies in `(0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MedicalConfig {
    /// Confidence below which escalation is forced.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_escalation_threshold: f64,
}

impl Default for MedicalConfig {
    fn default() -> Self {
        Self {
            confidence_escalation_threshold: default_confidence_threshold(),
        }
    }
}

/// Returns the default confidence escalation threshold.
const fn default_confidence_threshold() -> f64 {
    0.60
}

/// Store database locations.
///
/// # Invariants
/// - The three paths are distinct; the stores are physically separate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoresConfig {
    /// Hospital Store database path (PHI zone).
    pub hospital_path: PathBuf,
    /// Processing Store database path (tokenized zone).
    pub processing_path: PathBuf,
    /// Audit Log database path.
    pub audit_path: PathBuf,
}

/// Roles a configured API caller may hold.
const KNOWN_ROLES: [&str; 3] = ["token_issuer", "token_reader", "phi_bridge"];

/// One configured bearer credential.
///
/// # Invariants
/// - `roles` is a subset of the known role labels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BearerTokenConfig {
    /// Bearer token value (deployment secret).
    pub token: String,
    /// Actor identity recorded in audits.
    pub actor: String,
    /// Granted role labels.
    pub roles: Vec<String>,
}

/// HTTP server settings.
///
/// # Invariants
/// - `max_body_bytes` is greater than zero.
/// - Timeouts apply per call (default 30 seconds).
/// - The webhook shared secret is non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Socket address the server binds.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Maximum accepted request body size in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Per-call I/O timeout in seconds.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    /// Shared secret verifying inbound transport signatures.
    #[serde(default)]
    pub webhook_secret: String,
    /// Bearer credentials accepted by the Tokenization API.
    #[serde(default)]
    pub auth_tokens: Vec<BearerTokenConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_body_bytes: default_max_body_bytes(),
            call_timeout_seconds: default_call_timeout_seconds(),
            webhook_secret: String::new(),
            auth_tokens: Vec::new(),
        }
    }
}

/// Detector adapter settings.
///
/// # Invariants
/// - `timeout_ms` is greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DetectorConfig {
    /// Inference endpoint URL.
    #[serde(default = "default_detector_endpoint")]
    pub endpoint: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_adapter_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detector_endpoint(),
            timeout_ms: default_adapter_timeout_ms(),
        }
    }
}

/// Returns the default loopback inference endpoint.
fn default_detector_endpoint() -> String {
    "http://127.0.0.1:9090/detect".to_string()
}

/// Returns the default adapter call timeout (30 seconds).
const fn default_adapter_timeout_ms() -> u64 {
    30_000
}

/// Notifier adapter settings.
///
/// # Invariants
/// - `channel_urls` keys are channel routing labels.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotifierConfig {
    /// Destination webhook URL per channel routing label.
    #[serde(default)]
    pub channel_urls: BTreeMap<String, String>,
    /// Request timeout in milliseconds.
    #[serde(default = "default_adapter_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel_urls: BTreeMap::new(),
            timeout_ms: default_adapter_timeout_ms(),
        }
    }
}

/// Returns the default loopback bind address.
fn default_bind_addr() -> String {
    "127.0.0.1:8088".to_string()
}

/// Returns the default request body cap (1 MiB).
const fn default_max_body_bytes() -> usize {
    1024 * 1024
}

/// Returns the default per-call timeout (30 seconds).
const fn default_call_timeout_seconds() -> u64 {
    30
}

// ============================================================================
// SECTION: Root Configuration
// ============================================================================

/// Root configuration structure read once at startup.
///
/// # Invariants
/// - `validate` has accepted the structure before any component consumes it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GateConfig {
    /// Session lifecycle settings.
    #[serde(default)]
    pub session: SessionConfig,
    /// Input queue settings.
    pub input_queue: InputQueueConfig,
    /// Task retry and deadline settings.
    #[serde(default)]
    pub task: TaskConfig,
    /// Worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Queue arrangement settings.
    #[serde(default)]
    pub queues: QueuesConfig,
    /// Tokenization settings.
    pub tokenization: TokenizationConfig,
    /// Audit retention settings.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Medical thresholds.
    #[serde(default)]
    pub medical: MedicalConfig,
    /// Store database locations.
    pub stores: StoresConfig,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Detector adapter settings.
    #[serde(default)]
    pub detector: DetectorConfig,
    /// Notifier adapter settings.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl GateConfig {
    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every field against its documented range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_nonzero_u64(self.session.ttl_seconds, "session.ttl_seconds")?;
        if self.input_queue.sender_salt.is_empty() {
            return Err(ConfigError::Invalid(
                "input_queue.sender_salt must not be empty".to_string(),
            ));
        }
        ensure_nonzero_u64(self.input_queue.deadline_seconds, "input_queue.deadline_seconds")?;
        ensure_nonzero_u64(self.input_queue.lease_seconds, "input_queue.lease_seconds")?;
        ensure_nonzero_u64(self.input_queue.max_media_bytes, "input_queue.max_media_bytes")?;
        if self.task.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "task.max_attempts must be greater than zero".to_string(),
            ));
        }
        ensure_nonzero_u64(
            self.task.retry_delay_base_seconds,
            "task.retry_delay_base_seconds",
        )?;
        for (stage_label, deadline) in &self.task.deadline_seconds_by_stage {
            if !known_stage(stage_label) {
                return Err(ConfigError::Invalid(format!(
                    "task.deadline_seconds_by_stage has unknown stage: {stage_label}"
                )));
            }
            ensure_nonzero_u64(*deadline, "task.deadline_seconds_by_stage value")?;
        }
        if self.worker.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker.pool_size must be greater than zero".to_string(),
            ));
        }
        if self.worker.prefetch == 0 {
            return Err(ConfigError::Invalid(
                "worker.prefetch must be greater than zero".to_string(),
            ));
        }
        if self.worker.min_share_percent == 0 || self.worker.min_share_percent > 100 {
            return Err(ConfigError::Invalid(
                "worker.min_share_percent must be in [1, 100]".to_string(),
            ));
        }
        self.validate_priority_order()?;
        if self.queues.high_water_mark == 0 {
            return Err(ConfigError::Invalid(
                "queues.high_water_mark must be greater than zero".to_string(),
            ));
        }
        if self.tokenization.alias_vocabulary_salt.is_empty() {
            return Err(ConfigError::Invalid(
                "tokenization.alias_vocabulary_salt must not be empty".to_string(),
            ));
        }
        ensure_nonzero_u64(
            self.tokenization.reconciliation_grace_seconds,
            "tokenization.reconciliation_grace_seconds",
        )?;
        ensure_nonzero_u64(
            self.tokenization.default_token_ttl_seconds,
            "tokenization.default_token_ttl_seconds",
        )?;
        if self.audit.retention_days == 0 {
            return Err(ConfigError::Invalid(
                "audit.retention_days must be greater than zero".to_string(),
            ));
        }
        let threshold = self.medical.confidence_escalation_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "medical.confidence_escalation_threshold must be in (0.0, 1.0]".to_string(),
            ));
        }
        self.validate_store_paths()?;
        if self.server.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_body_bytes must be greater than zero".to_string(),
            ));
        }
        ensure_nonzero_u64(self.server.call_timeout_seconds, "server.call_timeout_seconds")?;
        for credential in &self.server.auth_tokens {
            if credential.token.is_empty() || credential.actor.is_empty() {
                return Err(ConfigError::Invalid(
                    "server.auth_tokens entries need a token and an actor".to_string(),
                ));
            }
            for role in &credential.roles {
                if !KNOWN_ROLES.contains(&role.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "server.auth_tokens has unknown role: {role}"
                    )));
                }
            }
        }
        ensure_nonzero_u64(self.detector.timeout_ms, "detector.timeout_ms")?;
        ensure_nonzero_u64(self.notifier.timeout_ms, "notifier.timeout_ms")?;
        Ok(())
    }

    /// Checks that the priority order is a permutation of the queue labels.
    fn validate_priority_order(&self) -> Result<(), ConfigError> {
        let expected: Vec<&str> =
            QueueName::PRIORITY_ORDER.iter().map(|queue| queue.as_str()).collect();
        if self.queues.priority_order.len() != expected.len() {
            return Err(ConfigError::Invalid(
                "queues.priority_order must list each queue exactly once".to_string(),
            ));
        }
        for label in &self.queues.priority_order {
            if !expected.contains(&label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "queues.priority_order has unknown queue: {label}"
                )));
            }
        }
        let mut seen = self.queues.priority_order.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != expected.len() {
            return Err(ConfigError::Invalid(
                "queues.priority_order must list each queue exactly once".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks that the three store databases are physically separate.
    fn validate_store_paths(&self) -> Result<(), ConfigError> {
        let hospital = &self.stores.hospital_path;
        let processing = &self.stores.processing_path;
        let audit = &self.stores.audit_path;
        if hospital == processing || hospital == audit || processing == audit {
            return Err(ConfigError::Invalid(
                "stores paths must be three distinct databases".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Rejects a zero value with a field-named error.
fn ensure_nonzero_u64(value: u64, field: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    Ok(())
}

/// Returns true when the label names a known stage.
fn known_stage(label: &str) -> bool {
    [
        Stage::ImagePrep,
        Stage::Detection,
        Stage::Decision,
        Stage::Notification,
        Stage::AuditFinalize,
        Stage::HumanReview,
    ]
    .iter()
    .any(|stage| stage.as_str() == label)
}
