// crates/phi-gate-server/src/state.rs
// ============================================================================
// Module: Server State
// Description: Shared handler state for the HTTP surface.
// Purpose: Hand each request the collaborators it needs, nothing more.
// Dependencies: phi-gate-core, phi-gate-queue, phi-gate-runtime, phi-gate-tokenize
// ============================================================================

//! ## Overview
//! The handler state is a bundle of shared references. Handlers see the
//! Tokenization Service and the input boundary only; no handler can reach a
//! store directly, so the trust-zone rules of the inner crates hold for the
//! HTTP surface by construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use phi_gate_adapters::WebhookVerifier;
use phi_gate_core::AuditLog;
use phi_gate_core::Clock;
use phi_gate_queue::InputQueue;
use phi_gate_queue::Packager;
use phi_gate_runtime::InMemoryTokenDirectory;
use phi_gate_tokenize::TokenizationService;

use crate::auth::BearerAuthenticator;
use crate::telemetry::ApiMetrics;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Tokenization Service.
    pub tokenize: Arc<TokenizationService>,
    /// Inbound webhook verifier.
    pub verifier: Arc<WebhookVerifier>,
    /// Input packager.
    pub packager: Arc<Packager>,
    /// Encrypted input queue.
    pub queue: Arc<InputQueue>,
    /// Source-to-token directory.
    pub directory: Arc<InMemoryTokenDirectory>,
    /// Bearer authenticator.
    pub auth: Arc<BearerAuthenticator>,
    /// Audit log.
    pub audit: Arc<dyn AuditLog>,
    /// Injected clock.
    pub clock: Arc<dyn Clock>,
    /// Metrics sink.
    pub metrics: Arc<dyn ApiMetrics>,
}
