// crates/phi-gate-adapters/src/lib.rs
// ============================================================================
// Module: PHI Gate Adapters
// Description: Pluggable collaborators behind the core interfaces.
// Purpose: Guideline modules, detector, notifiers, and webhook verification.
// Dependencies: async-trait, hmac, phi-gate-core, phi-gate-queue, reqwest
// ============================================================================

//! ## Overview
//! Everything medical or external stays behind a core interface: guideline
//! knowledge behind [`phi_gate_core::DecisionModule`] and
//! [`phi_gate_core::ProtocolStore`], the vision model behind
//! [`phi_gate_core::Detector`], delivery behind
//! [`phi_gate_core::Notifier`], and the transport boundary behind
//! [`webhook::WebhookVerifier`]. Implementations here fail closed and hold
//! no shared mutable state.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// HTTP detector adapter.
pub mod detector;
/// Evidence-based guideline modules.
pub mod guidelines;
/// Outbound notifier adapters.
pub mod notify;
/// Inbound webhook verification.
pub mod webhook;

pub use detector::HttpDetector;
pub use detector::HttpDetectorConfig;
pub use guidelines::FollowUpModule;
pub use guidelines::RiskModifierModule;
pub use guidelines::SeverityGradingModule;
pub use guidelines::StaticProtocolTable;
pub use notify::ChannelNotifier;
pub use notify::WebhookNotifier;
pub use webhook::WebhookError;
pub use webhook::WebhookVerifier;
