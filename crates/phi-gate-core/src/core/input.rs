// crates/phi-gate-core/src/core/input.rs
// ============================================================================
// Module: PHI Gate Input Model
// Description: Packaged inbound events and their media metadata.
// Purpose: Carry normalized, identity-free input through the queue and triage.
// Dependencies: serde, sha2, crate::core::{identifiers, time}
// ============================================================================

//! ## Overview
//! An [`InputPackage`] is the normalized form of one inbound transport event
//! after the Input Packager has validated format, pseudonymized the sender,
//! and redacted transport-level fields. Packages are transient: they live
//! encrypted in the Input Queue until the Dispatcher consumes them. Large
//! media never travels inline; it is referenced by URL into a signed object
//! store and downloaded later inside the image-processing queue.
//!
//! # Invariants
//! - A package contains no hospital identity fields and no raw sender handle.
//! - `processing_id` is assigned exactly once and drives idempotency.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::core::identifiers::EventId;
use crate::core::identifiers::ProcessingId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::SourceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Input Classification
// ============================================================================

/// Kind of content carried by an inbound event.
///
/// # Invariants
/// - Variants are stable for storage and audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// Text only.
    Text,
    /// One or more images.
    Image,
    /// One or more videos.
    Video,
    /// Text plus media, or mixed media kinds.
    Mixed,
}

impl InputType {
    /// Returns a stable label for storage and audits.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Mixed => "mixed",
        }
    }

    /// Parses a stored label back into an input type.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Returns true when the input carries media requiring download.
    #[must_use]
    pub const fn has_media(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Mixed)
    }
}

// ============================================================================
// SECTION: Media References
// ============================================================================

/// Pointer to one media object held by the signed object store.
///
/// # Invariants
/// - `byte_size` reflects the transport-declared size, validated against the
///   configured cap before packaging.
/// - `content_hash` is the lowercase hex SHA-256 of the media bytes when the
///   transport supplies them inline, or of the reference URL otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Signed object store URL.
    pub url: String,
    /// Declared MIME type.
    pub content_type: String,
    /// Declared size in bytes.
    pub byte_size: u64,
    /// Lowercase hex SHA-256 content hash.
    pub content_hash: String,
}

/// Renders bytes as lowercase hex.
#[must_use]
pub fn hex_lower(bytes: &[u8]) -> String {
    let mut rendered = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = std::fmt::Write::write_fmt(&mut rendered, format_args!("{byte:02x}"));
    }
    rendered
}

/// Computes the lowercase hex SHA-256 digest of a byte slice.
#[must_use]
pub fn content_hash_hex(bytes: &[u8]) -> String {
    hex_lower(&Sha256::digest(bytes))
}

// ============================================================================
// SECTION: Input Package
// ============================================================================

/// Normalized, identity-free inbound event.
///
/// # Invariants
/// - Contains no hospital identity fields; the sender survives only as the
///   salted [`SourceId`].
/// - `session_id` is `None` until the Dispatcher binds a session; FIFO
///   ordering before binding is per `source_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPackage {
    /// Idempotency identifier assigned by the packager.
    pub processing_id: ProcessingId,
    /// Transport-level event identifier for duplicate-delivery detection.
    pub event_id: EventId,
    /// Salted hash of the sender handle.
    pub source_id: SourceId,
    /// Session bound by the Dispatcher, when known.
    pub session_id: Option<SessionId>,
    /// Content classification.
    pub input_type: InputType,
    /// Small text content, when present.
    pub text: Option<String>,
    /// Media references, large payloads by URL only.
    pub media: Vec<MediaRef>,
    /// Instant the event was packaged.
    pub received_at: Timestamp,
}

impl InputPackage {
    /// Returns the total declared media size in bytes.
    #[must_use]
    pub fn media_bytes(&self) -> u64 {
        self.media.iter().map(|media| media.byte_size).sum()
    }

    /// Returns the number of attached media objects.
    #[must_use]
    pub fn media_count(&self) -> usize {
        self.media.len()
    }
}
