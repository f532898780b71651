// crates/phi-gate-adapters/src/detector.rs
// ============================================================================
// Module: Detector Adapter
// Description: HTTP adapter for the external pressure-injury vision model.
// Purpose: Bridge detection requests to a remote inference endpoint safely.
// Dependencies: async-trait, phi-gate-core, reqwest, serde, tracing
// ============================================================================

//! ## Overview
//! The vision model itself is an external collaborator; this adapter owns
//! only the contract: a bounded POST of the image reference to the inference
//! endpoint, strict response validation, and fail-closed mapping onto the
//! fault taxonomy. Network faults and timeouts are transient; malformed or
//! out-of-range model output is a contract violation and never retried.
//! The adapter polls its cancellation signal around the remote call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phi_gate_core::AdapterError;
use phi_gate_core::AnatomicalLocation;
use phi_gate_core::CancelSignal;
use phi_gate_core::Clock;
use phi_gate_core::DetectionRequest;
use phi_gate_core::Detector;
use phi_gate_core::LppDetection;
use phi_gate_core::LppGrade;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the HTTP detector adapter.
///
/// # Invariants
/// - `timeout_ms` bounds the full request lifecycle.
#[derive(Debug, Clone)]
pub struct HttpDetectorConfig {
    /// Inference endpoint URL.
    pub endpoint: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for HttpDetectorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9090/detect".to_string(),
            timeout_ms: 30_000,
        }
    }
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Request body sent to the inference endpoint.
#[derive(Debug, Serialize)]
struct DetectWireRequest<'a> {
    /// Signed object store URL of the image.
    image_url: &'a str,
    /// Declared MIME type.
    content_type: &'a str,
    /// Content hash for integrity checking on the model side.
    content_hash: &'a str,
}

/// Response body returned by the inference endpoint.
#[derive(Debug, Deserialize)]
struct DetectWireResponse {
    /// Severity grade on the 0-4 scale.
    grade: u8,
    /// Model confidence in `[0.0, 1.0]`.
    confidence: f64,
    /// Anatomical location label.
    location: String,
    /// Model version label.
    model_version: String,
}

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// HTTP detector adapter.
///
/// # Invariants
/// - Out-of-range grades, confidences, and unknown locations fail closed.
pub struct HttpDetector {
    /// Adapter configuration.
    config: HttpDetectorConfig,
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Injected clock for detection timestamps.
    clock: Arc<dyn Clock>,
}

impl HttpDetector {
    /// Creates the adapter with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the HTTP client cannot be built.
    pub fn new(config: HttpDetectorConfig, clock: Arc<dyn Clock>) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| AdapterError::non_retryable(format!("http client build: {err}")))?;
        Ok(Self {
            config,
            client,
            clock,
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(
        &self,
        request: &DetectionRequest,
        cancel: &CancelSignal,
    ) -> Result<LppDetection, AdapterError> {
        if cancel.is_canceled() {
            return Err(AdapterError::Canceled);
        }
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&DetectWireRequest {
                image_url: &request.image.url,
                content_type: &request.image.content_type,
                content_hash: &request.image.content_hash,
            })
            .send()
            .await
            .map_err(|err| AdapterError::transient(format!("inference call: {err}")))?;
        if cancel.is_canceled() {
            return Err(AdapterError::Canceled);
        }

        let status = response.status();
        if status.is_server_error() {
            return Err(AdapterError::transient(format!("inference status {status}")));
        }
        if !status.is_success() {
            return Err(AdapterError::non_retryable(format!("inference status {status}")));
        }
        let body: DetectWireResponse = response
            .json()
            .await
            .map_err(|err| AdapterError::non_retryable(format!("inference schema: {err}")))?;
        debug!(grade = body.grade, confidence = body.confidence, "detection received");

        let grade = LppGrade::new(body.grade)
            .ok_or_else(|| AdapterError::non_retryable("grade out of range"))?;
        if !(0.0..=1.0).contains(&body.confidence) {
            return Err(AdapterError::non_retryable("confidence out of range"));
        }
        let location = AnatomicalLocation::parse(&body.location)
            .ok_or_else(|| AdapterError::non_retryable("unknown anatomical location"))?;
        Ok(LppDetection {
            token_id: request.token_id.clone(),
            grade,
            confidence: body.confidence,
            location,
            model_version: body.model_version,
            detected_at: self.clock.now(),
        })
    }
}
