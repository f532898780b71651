// crates/phi-gate-server/src/routes.rs
// ============================================================================
// Module: HTTP Routes
// Description: Tokenization API endpoints and the inbound transport webhook.
// Purpose: Expose the internal JSON surface with prompt, classified answers.
// Dependencies: axum, phi-gate-core, phi-gate-queue, phi-gate-tokenize, serde
// ============================================================================

//! ## Overview
//! Two surfaces share the router: the bearer-authenticated Tokenization API
//! (request, resolve, revoke, bridge lookup, source registration) and the
//! inbound transport webhook. The webhook verifies the transport signature
//! before any processing, rejects unsigned or malformed payloads with a 4xx
//! and an `input_rejected` audit entry, and otherwise hands the event to the
//! packager and answers immediately; everything downstream is asynchronous.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::get;
use axum::routing::post;
use phi_gate_core::ActorId;
use phi_gate_core::AgeRange;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::Classified;
use phi_gate_core::Component;
use phi_gate_core::CorrelationId;
use phi_gate_core::FaultKind;
use phi_gate_core::GenderCategory;
use phi_gate_core::HospitalMrn;
use phi_gate_core::RiskFactors;
use phi_gate_core::TokenId;
use phi_gate_queue::QueueError;
use phi_gate_tokenize::Caller;
use phi_gate_tokenize::TokenizeError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;
use crate::telemetry::ApiMetricEvent;
use crate::telemetry::ApiOutcome;
use crate::telemetry::ApiRoute;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Signature header carried by inbound transport deliveries.
pub const SIGNATURE_HEADER: &str = "x-gate-signature";

/// Builds the HTTP router over the shared state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/tokens", post(request_token))
        .route("/v1/tokens/{token_id}", get(resolve_token))
        .route("/v1/tokens/{token_id}/revoke", post(revoke_token))
        .route("/v1/tokens/{token_id}/bridge", post(bridge_lookup))
        .route("/v1/sources", post(register_source))
        .route("/webhook/inbound", post(webhook_inbound))
        .with_state(state)
}

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Token issuance request body.
#[derive(Debug, Deserialize)]
struct RequestTokenBody {
    /// Hospital medical record number.
    hospital_mrn: String,
    /// System the token is issued to.
    requesting_system: String,
    /// Grant TTL in seconds, when overriding the default.
    ttl_seconds: Option<u64>,
}

/// Token issuance response body.
#[derive(Debug, Serialize)]
struct TokenGrantBody {
    /// Issued (or reused) token identifier.
    token_id: String,
    /// Deterministic display alias.
    token_alias: String,
    /// Expiry instant in epoch milliseconds.
    expires_at: i64,
    /// Whether an existing active grant was returned.
    reused: bool,
}

/// Token resolution response body.
#[derive(Debug, Serialize)]
struct ProjectionBody {
    /// Coarse age bucket.
    age_range: AgeRange,
    /// Coarse gender category.
    gender_category: GenderCategory,
    /// Closed-vocabulary risk factors.
    risk_factors: RiskFactors,
}

/// Token revocation request body.
#[derive(Debug, Deserialize)]
struct RevokeBody {
    /// Stable revocation reason.
    reason: String,
}

/// Bridge lookup response body.
#[derive(Debug, Serialize)]
struct BridgeBody {
    /// Hospital medical record number.
    hospital_mrn: String,
}

/// Source registration request body.
#[derive(Debug, Deserialize)]
struct RegisterSourceBody {
    /// Raw sender handle to link.
    sender: String,
    /// Token the sender submits for.
    token_id: String,
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Stable error label.
    error: String,
}

/// Webhook acknowledgement body.
#[derive(Debug, Serialize)]
struct AcceptedBody {
    /// Always `accepted`; the transport needs nothing more.
    status: &'static str,
}

// ============================================================================
// SECTION: Tokenization API Handlers
// ============================================================================

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}

/// POST `/v1/tokens`.
async fn request_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RequestTokenBody>,
) -> Result<Json<TokenGrantBody>, (StatusCode, Json<ErrorBody>)> {
    let caller = authenticate(&state, &headers, ApiRoute::TokenRequest)?;
    let grant = state
        .tokenize
        .request_token(
            &caller,
            &HospitalMrn::new(body.hospital_mrn),
            &body.requesting_system,
            body.ttl_seconds.map(|seconds| seconds.saturating_mul(1_000)),
        )
        .map_err(|err| refuse(&state, ApiRoute::TokenRequest, &err))?;
    state.metrics.record_request(ApiMetricEvent {
        route: ApiRoute::TokenRequest,
        outcome: ApiOutcome::Ok,
    });
    Ok(Json(TokenGrantBody {
        token_id: grant.token_id.as_str().to_string(),
        token_alias: grant.token_alias.as_str().to_string(),
        expires_at: grant.expires_at.as_unix_millis(),
        reused: grant.reused,
    }))
}

/// GET `/v1/tokens/{token_id}`.
async fn resolve_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
) -> Result<Json<ProjectionBody>, (StatusCode, Json<ErrorBody>)> {
    let caller = authenticate(&state, &headers, ApiRoute::TokenResolve)?;
    let projection = state
        .tokenize
        .resolve_token(&caller, &TokenId::new(token_id))
        .map_err(|err| refuse(&state, ApiRoute::TokenResolve, &err))?;
    state.metrics.record_request(ApiMetricEvent {
        route: ApiRoute::TokenResolve,
        outcome: ApiOutcome::Ok,
    });
    Ok(Json(ProjectionBody {
        age_range: projection.age_range,
        gender_category: projection.gender_category,
        risk_factors: projection.risk_factors,
    }))
}

/// POST `/v1/tokens/{token_id}/revoke`.
async fn revoke_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
    Json(body): Json<RevokeBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let caller = authenticate(&state, &headers, ApiRoute::TokenRevoke)?;
    state
        .tokenize
        .revoke_token(&caller, &TokenId::new(token_id), &body.reason)
        .map_err(|err| refuse(&state, ApiRoute::TokenRevoke, &err))?;
    state.metrics.record_request(ApiMetricEvent {
        route: ApiRoute::TokenRevoke,
        outcome: ApiOutcome::Ok,
    });
    Ok(StatusCode::NO_CONTENT)
}

/// POST `/v1/tokens/{token_id}/bridge`.
async fn bridge_lookup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token_id): Path<String>,
) -> Result<Json<BridgeBody>, (StatusCode, Json<ErrorBody>)> {
    let caller = authenticate(&state, &headers, ApiRoute::BridgeLookup)?;
    let mrn = state
        .tokenize
        .bridge_lookup(&caller, &TokenId::new(token_id))
        .map_err(|err| refuse(&state, ApiRoute::BridgeLookup, &err))?;
    state.metrics.record_request(ApiMetricEvent {
        route: ApiRoute::BridgeLookup,
        outcome: ApiOutcome::Ok,
    });
    Ok(Json(BridgeBody {
        hospital_mrn: mrn.as_str().to_string(),
    }))
}

/// POST `/v1/sources`.
async fn register_source(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterSourceBody>,
) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let caller = authenticate(&state, &headers, ApiRoute::SourceRegister)?;
    if !caller.has_role(phi_gate_tokenize::ServiceRole::TokenIssuer) {
        return Err(error_response(StatusCode::FORBIDDEN, "forbidden"));
    }
    let Some(token_id) = TokenId::parse(&body.token_id) else {
        return Err(error_response(StatusCode::BAD_REQUEST, "malformed_token"));
    };
    // The raw sender handle is consumed here and survives only as its
    // salted hash.
    let source_id = state.packager.source_id(&body.sender);
    state.directory.register(source_id, token_id);
    state.metrics.record_request(ApiMetricEvent {
        route: ApiRoute::SourceRegister,
        outcome: ApiOutcome::Ok,
    });
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// SECTION: Inbound Webhook Handler
// ============================================================================

/// POST `/webhook/inbound`.
///
/// Always answers promptly: 202 on acceptance, 4xx on rejection, regardless
/// of downstream state.
async fn webhook_inbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<AcceptedBody>), (StatusCode, Json<ErrorBody>)> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let event = match state.verifier.accept(&body, signature) {
        Ok(event) => event,
        Err(error) => {
            let status = match &error {
                phi_gate_adapters::WebhookError::BadSignature => StatusCode::UNAUTHORIZED,
                phi_gate_adapters::WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
            };
            reject_input(&state, &error.to_string());
            return Err(error_response(status, "input_rejected"));
        }
    };

    let package = match state.packager.package(&event, state.clock.now()) {
        Ok(package) => package,
        Err(error) => {
            reject_input(&state, &error.to_string());
            return Err(error_response(StatusCode::UNPROCESSABLE_ENTITY, "input_rejected"));
        }
    };

    match state.queue.enqueue(&package) {
        Ok(()) => {
            state.metrics.record_request(ApiMetricEvent {
                route: ApiRoute::WebhookInbound,
                outcome: ApiOutcome::Ok,
            });
            Ok((
                StatusCode::ACCEPTED,
                Json(AcceptedBody {
                    status: "accepted",
                }),
            ))
        }
        Err(error) => {
            warn!(%error, "enqueue failed");
            state.metrics.record_request(ApiMetricEvent {
                route: ApiRoute::WebhookInbound,
                outcome: ApiOutcome::Error,
            });
            let status = match error {
                QueueError::Store(ref inner)
                    if inner.fault_kind() == FaultKind::Transient =>
                {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err(error_response(status, "enqueue_failed"))
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Authenticates a request, recording refusals.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    route: ApiRoute,
) -> Result<Caller, (StatusCode, Json<ErrorBody>)> {
    let header = headers.get("authorization").and_then(|value| value.to_str().ok());
    state.auth.authenticate(header).ok_or_else(|| {
        state.metrics.record_request(ApiMetricEvent {
            route,
            outcome: ApiOutcome::Refused,
        });
        error_response(StatusCode::UNAUTHORIZED, "unauthorized")
    })
}

/// Maps a tokenization error onto an HTTP refusal.
fn refuse(
    state: &AppState,
    route: ApiRoute,
    error: &TokenizeError,
) -> (StatusCode, Json<ErrorBody>) {
    state.metrics.record_request(ApiMetricEvent {
        route,
        outcome: ApiOutcome::Refused,
    });
    let (status, label) = match error {
        TokenizeError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        TokenizeError::Unknown => (StatusCode::NOT_FOUND, "unknown_token"),
        TokenizeError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        TokenizeError::Expired => (StatusCode::GONE, "expired"),
        TokenizeError::PhiLeak(_) => (StatusCode::INTERNAL_SERVER_ERROR, "phi_guard_refused"),
        TokenizeError::Store(inner) if inner.fault_kind() == FaultKind::Transient => {
            (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
        }
        TokenizeError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_failure"),
    };
    error_response(status, label)
}

/// Builds a labeled error response.
fn error_response(status: StatusCode, label: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: label.to_string(),
        }),
    )
}

/// Audits a rejected inbound event.
fn reject_input(state: &AppState, detail: &str) {
    state.metrics.record_request(ApiMetricEvent {
        route: ApiRoute::WebhookInbound,
        outcome: ApiOutcome::Refused,
    });
    let record = AuditRecord {
        timestamp: state.clock.now(),
        actor_id: ActorId::new("webhook"),
        token_id: None,
        action: AuditAction::InputRejected,
        component: Component::Server,
        outcome: AuditOutcome::Rejected,
        correlation_id: CorrelationId::new("inbound"),
        detail: Some(detail.to_string()),
    };
    if let Err(error) = state.audit.append(&record) {
        warn!(%error, "audit append failed");
    }
}
