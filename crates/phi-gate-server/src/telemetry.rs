// crates/phi-gate-server/src/telemetry.rs
// ============================================================================
// Module: Server Telemetry
// Description: Observability hooks for the HTTP surface.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: none
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for API request counters and
//! latency histograms. It is intentionally dependency-light so downstream
//! deployments can plug in Prometheus or OpenTelemetry without redesign.
//! Telemetry must never carry token identifiers or payload content; labels
//! are route and outcome classifications only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default latency buckets in milliseconds for API request histograms.
pub const API_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000];

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// API route classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRoute {
    /// Token issuance.
    TokenRequest,
    /// Token resolution.
    TokenResolve,
    /// Token revocation.
    TokenRevoke,
    /// Audited bridge lookup.
    BridgeLookup,
    /// Source-to-token registration.
    SourceRegister,
    /// Inbound transport webhook.
    WebhookInbound,
}

impl ApiRoute {
    /// Returns a stable label for the route.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TokenRequest => "token_request",
            Self::TokenResolve => "token_resolve",
            Self::TokenRevoke => "token_revoke",
            Self::BridgeLookup => "bridge_lookup",
            Self::SourceRegister => "source_register",
            Self::WebhookInbound => "webhook_inbound",
        }
    }
}

/// API request outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiOutcome {
    /// Successful request.
    Ok,
    /// Request refused (authentication, validation, conflict).
    Refused,
    /// Server-side failure.
    Error,
}

impl ApiOutcome {
    /// Returns a stable label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Refused => "refused",
            Self::Error => "error",
        }
    }
}

/// API request metric event payload.
#[derive(Debug, Clone, Copy)]
pub struct ApiMetricEvent {
    /// Route classification.
    pub route: ApiRoute,
    /// Request outcome.
    pub outcome: ApiOutcome,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink for API requests and latencies.
pub trait ApiMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: ApiMetricEvent);
    /// Records a latency observation for the request.
    fn record_latency(&self, event: ApiMetricEvent, latency: Duration);
}

/// No-op metrics sink.
///
/// # Invariants
/// - Metrics are intentionally discarded.
pub struct NoopMetrics;

impl ApiMetrics for NoopMetrics {
    fn record_request(&self, _event: ApiMetricEvent) {}

    fn record_latency(&self, _event: ApiMetricEvent, _latency: Duration) {}
}
