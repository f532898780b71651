// crates/phi-gate-queue/src/packager.rs
// ============================================================================
// Module: Input Packager
// Description: Format-only normalization of raw inbound transport events.
// Purpose: Produce identity-free input packages; interpret nothing medical.
// Dependencies: hmac, phi-gate-core, sha2, uuid
// ============================================================================

//! ## Overview
//! The packager sits in the Input Isolation Layer and has zero medical
//! knowledge: it validates format only (MIME allowlist, size cap, magic-byte
//! check), pseudonymizes the sender with a keyed HMAC, assigns the
//! processing identifier, attaches content hashes, and redacts every
//! transport-level field it does not explicitly carry forward. Any
//! content-level medical interpretation here would be a protocol violation;
//! the packager fails closed instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use phi_gate_core::Classified;
use phi_gate_core::EventId;
use phi_gate_core::FaultKind;
use phi_gate_core::InputPackage;
use phi_gate_core::InputType;
use phi_gate_core::MediaRef;
use phi_gate_core::ProcessingId;
use phi_gate_core::SourceId;
use phi_gate_core::Timestamp;
use phi_gate_core::content_hash_hex;
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// SECTION: Raw Events
// ============================================================================

/// One media attachment as received from the transport.
///
/// # Invariants
/// - `leading_bytes`, when present, holds the first bytes of the object for
///   the magic-byte check; large payloads stay behind `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMedia {
    /// Signed object store URL.
    pub url: String,
    /// Transport-declared MIME type.
    pub content_type: String,
    /// Transport-declared size in bytes.
    pub byte_size: u64,
    /// Leading bytes for format sniffing, when the transport provides them.
    pub leading_bytes: Option<Vec<u8>>,
}

/// Raw inbound event after transport signature verification.
///
/// # Invariants
/// - `sender` is the raw transport handle; it never survives packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInboundEvent {
    /// Transport-level event identifier.
    pub event_id: EventId,
    /// Raw sender handle.
    pub sender: String,
    /// Message text, when present.
    pub text: Option<String>,
    /// Media attachments.
    pub media: Vec<RawMedia>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the packager; all reject the input at the boundary.
///
/// # Invariants
/// - Every variant classifies as `InputRejected` and is never retried.
#[derive(Debug, Error)]
pub enum PackageError {
    /// Declared MIME type is not in the allowlist.
    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),
    /// Media object exceeds the configured size cap.
    #[error("media exceeds size cap ({actual} > {cap})")]
    Oversize {
        /// Declared size in bytes.
        actual: u64,
        /// Configured cap in bytes.
        cap: u64,
    },
    /// Leading bytes do not match the declared MIME type.
    #[error("media magic bytes do not match declared type {0}")]
    MagicMismatch(String),
    /// Event carries neither text nor media.
    #[error("event is empty")]
    Empty,
}

impl Classified for PackageError {
    fn fault_kind(&self) -> FaultKind {
        FaultKind::InputRejected
    }
}

// ============================================================================
// SECTION: Packager
// ============================================================================

/// MIME types the packager accepts.
const ALLOWED_MEDIA_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "video/mp4"];

/// Format-only input packager.
///
/// # Invariants
/// - Holds the sender salt for pseudonymization; the salt never appears in
///   any output.
pub struct Packager {
    /// HMAC key for sender pseudonymization.
    sender_salt: Vec<u8>,
    /// Per-object media size cap in bytes.
    max_media_bytes: u64,
}

impl Packager {
    /// Creates a packager with the given salt and media cap.
    #[must_use]
    pub fn new(sender_salt: impl Into<Vec<u8>>, max_media_bytes: u64) -> Self {
        Self {
            sender_salt: sender_salt.into(),
            max_media_bytes,
        }
    }

    /// Packages one raw event after format validation.
    ///
    /// # Errors
    ///
    /// Returns [`PackageError`] when any attachment fails format validation
    /// or the event is empty; the event is rejected, never repaired.
    pub fn package(
        &self,
        event: &RawInboundEvent,
        now: Timestamp,
    ) -> Result<InputPackage, PackageError> {
        let has_text = event.text.as_deref().is_some_and(|text| !text.is_empty());
        if !has_text && event.media.is_empty() {
            return Err(PackageError::Empty);
        }

        let mut media = Vec::with_capacity(event.media.len());
        for raw in &event.media {
            media.push(self.validate_media(raw)?);
        }

        Ok(InputPackage {
            processing_id: ProcessingId::new(Uuid::new_v4().to_string()),
            event_id: event.event_id.clone(),
            source_id: self.source_id(&event.sender),
            session_id: None,
            input_type: classify(has_text, &event.media),
            text: event.text.clone().filter(|text| !text.is_empty()),
            media,
            received_at: now,
        })
    }

    /// Derives the salted source identifier for a sender handle.
    #[must_use]
    pub fn source_id(&self, sender: &str) -> SourceId {
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(&self.sender_salt) else {
            unreachable!("hmac-sha256 accepts keys of any length")
        };
        mac.update(sender.as_bytes());
        let digest = mac.finalize().into_bytes();
        SourceId::new(phi_gate_core::hex_lower(&digest))
    }

    /// Validates one attachment: allowlist, size cap, magic bytes.
    fn validate_media(&self, raw: &RawMedia) -> Result<MediaRef, PackageError> {
        if !ALLOWED_MEDIA_TYPES.contains(&raw.content_type.as_str()) {
            return Err(PackageError::UnsupportedMedia(raw.content_type.clone()));
        }
        if raw.byte_size > self.max_media_bytes {
            return Err(PackageError::Oversize {
                actual: raw.byte_size,
                cap: self.max_media_bytes,
            });
        }
        if let Some(leading) = &raw.leading_bytes
            && !magic_matches(&raw.content_type, leading)
        {
            return Err(PackageError::MagicMismatch(raw.content_type.clone()));
        }
        let content_hash = raw
            .leading_bytes
            .as_deref()
            .map_or_else(|| content_hash_hex(raw.url.as_bytes()), content_hash_hex);
        Ok(MediaRef {
            url: raw.url.clone(),
            content_type: raw.content_type.clone(),
            byte_size: raw.byte_size,
            content_hash,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Classifies the event by its carried content kinds.
fn classify(has_text: bool, media: &[RawMedia]) -> InputType {
    let has_image = media.iter().any(|raw| raw.content_type.starts_with("image/"));
    let has_video = media.iter().any(|raw| raw.content_type.starts_with("video/"));
    match (has_text, has_image, has_video) {
        (_, true, true) | (true, true, false) | (true, false, true) => InputType::Mixed,
        (_, true, false) => InputType::Image,
        (_, false, true) => InputType::Video,
        (_, false, false) => InputType::Text,
    }
}

/// Checks leading bytes against the declared MIME type.
fn magic_matches(content_type: &str, leading: &[u8]) -> bool {
    match content_type {
        "image/jpeg" => leading.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => leading.starts_with(&[0x89, 0x50, 0x4E, 0x47]),
        "image/webp" => {
            leading.len() >= 12 && leading.starts_with(b"RIFF") && leading[8..12] == *b"WEBP"
        }
        "video/mp4" => leading.len() >= 8 && leading[4..8] == *b"ftyp",
        _ => false,
    }
}
