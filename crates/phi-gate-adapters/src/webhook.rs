// crates/phi-gate-adapters/src/webhook.rs
// ============================================================================
// Module: Inbound Webhook Verification
// Description: Transport signature checking and payload normalization.
// Purpose: Refuse unsigned or malformed transport events at the boundary.
// Dependencies: hmac, phi-gate-core, phi-gate-queue, serde, sha2, subtle
// ============================================================================

//! ## Overview
//! Inbound transport events (for example a WhatsApp webhook delivery) are
//! verified before any processing: the body must carry a valid HMAC-SHA256
//! signature under the shared transport secret, compared in constant time.
//! Only then is the payload parsed into the packager's raw event form.
//! Rejections classify as `InputRejected`: surfaced as 4xx, audited by the
//! caller, never retried.
//!
//! Security posture: webhook bodies and signature headers are untrusted;
//! see `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use phi_gate_core::Classified;
use phi_gate_core::EventId;
use phi_gate_core::FaultKind;
use phi_gate_core::hex_lower;
use phi_gate_queue::RawInboundEvent;
use phi_gate_queue::RawMedia;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised at the transport boundary.
///
/// # Invariants
/// - Every variant classifies as `InputRejected`.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature missing or failed verification.
    #[error("transport signature invalid")]
    BadSignature,
    /// Body failed to parse as a transport payload.
    #[error("malformed transport payload: {0}")]
    Malformed(String),
}

impl Classified for WebhookError {
    fn fault_kind(&self) -> FaultKind {
        FaultKind::InputRejected
    }
}

// ============================================================================
// SECTION: Wire Payload
// ============================================================================

/// One media entry as delivered by the transport.
#[derive(Debug, Deserialize)]
struct WireMedia {
    /// Signed object store URL.
    url: String,
    /// Declared MIME type.
    content_type: String,
    /// Declared size in bytes.
    byte_size: u64,
}

/// Transport payload body.
#[derive(Debug, Deserialize)]
struct WirePayload {
    /// Transport-level event identifier.
    event_id: String,
    /// Raw sender handle.
    sender: String,
    /// Message text, when present.
    #[serde(default)]
    text: Option<String>,
    /// Media entries.
    #[serde(default)]
    media: Vec<WireMedia>,
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Inbound webhook verifier holding the shared transport secret.
///
/// # Invariants
/// - Signature comparison is constant-time.
/// - The secret never appears in errors, logs, or audits.
pub struct WebhookVerifier {
    /// Shared transport secret.
    secret: Vec<u8>,
}

impl WebhookVerifier {
    /// Creates a verifier over the shared secret.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Computes the lowercase hex signature for a body.
    #[must_use]
    pub fn sign(&self, body: &[u8]) -> String {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&self.secret) else {
            unreachable!("hmac-sha256 accepts keys of any length")
        };
        mac.update(body);
        hex_lower(&mac.finalize().into_bytes())
    }

    /// Verifies a provided hex signature against the body, in constant time.
    #[must_use]
    pub fn verify(&self, body: &[u8], provided_hex: &str) -> bool {
        let expected = self.sign(body);
        let provided = provided_hex.trim().to_ascii_lowercase();
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    /// Verifies and parses one transport delivery into a raw inbound event.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::BadSignature`] before any parsing when the
    /// signature fails, and [`WebhookError::Malformed`] for unparseable
    /// bodies.
    pub fn accept(
        &self,
        body: &[u8],
        provided_hex: &str,
    ) -> Result<RawInboundEvent, WebhookError> {
        if !self.verify(body, provided_hex) {
            return Err(WebhookError::BadSignature);
        }
        let payload: WirePayload = serde_json::from_slice(body)
            .map_err(|err| WebhookError::Malformed(err.to_string()))?;
        Ok(RawInboundEvent {
            event_id: EventId::new(payload.event_id),
            sender: payload.sender,
            text: payload.text,
            media: payload
                .media
                .into_iter()
                .map(|media| RawMedia {
                    url: media.url,
                    content_type: media.content_type,
                    byte_size: media.byte_size,
                    leading_bytes: None,
                })
                .collect(),
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
