// crates/phi-gate-queue/src/lib.rs
// ============================================================================
// Module: PHI Gate Input Layer
// Description: Input packaging and the encrypted durable input queue.
// Purpose: Isolate raw transport events from the medical orchestration layer.
// Dependencies: aes-gcm, hmac, phi-gate-core, rand, rusqlite, sha2, uuid
// ============================================================================

//! ## Overview
//! This crate is the Input Isolation Layer: the [`packager::Packager`]
//! normalizes raw transport events with format-only validation and sender
//! pseudonymization, and the [`queue::InputQueue`] buffers the resulting
//! packages encrypted at rest with per-source FIFO delivery, visibility
//! leases, and hard deadlines. Nothing in this crate understands medicine or
//! identity.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Rotating AES-256-GCM key holder.
pub mod keys;
/// Format-only input packager.
pub mod packager;
/// Encrypted durable input queue.
pub mod queue;

pub use keys::KeyError;
pub use keys::QueueKeyHolder;
pub use keys::SealedEntry;
pub use packager::PackageError;
pub use packager::Packager;
pub use packager::RawInboundEvent;
pub use packager::RawMedia;
pub use queue::InputQueue;
pub use queue::LeasedEntry;
pub use queue::QueueError;
