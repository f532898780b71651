// crates/phi-gate-server/src/auth/tests.rs
// ============================================================================
// Module: Bearer Authentication Tests
// Description: Credential matching and role scoping tests.
// ============================================================================
//! ## Overview
//! Validates header parsing, credential matching, and role grants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use phi_gate_config::BearerTokenConfig;
use phi_gate_tokenize::ServiceRole;

use super::BearerAuthenticator;

fn authenticator() -> BearerAuthenticator {
    BearerAuthenticator::from_config(&[
        BearerTokenConfig {
            token: "issuer-secret".to_string(),
            actor: "intake_gateway".to_string(),
            roles: vec!["token_issuer".to_string(), "token_reader".to_string()],
        },
        BearerTokenConfig {
            token: "bridge-secret".to_string(),
            actor: "care_coordinator".to_string(),
            roles: vec!["phi_bridge".to_string()],
        },
    ])
}

#[test]
fn known_token_yields_its_caller_and_roles() {
    let auth = authenticator();
    let caller = auth.authenticate(Some("Bearer issuer-secret")).unwrap();
    assert_eq!(caller.actor_id.as_str(), "intake_gateway");
    assert!(caller.has_role(ServiceRole::TokenIssuer));
    assert!(caller.has_role(ServiceRole::TokenReader));
    assert!(!caller.has_role(ServiceRole::PhiBridge));
}

#[test]
fn bridge_role_is_scoped_to_its_credential() {
    let auth = authenticator();
    let caller = auth.authenticate(Some("Bearer bridge-secret")).unwrap();
    assert!(caller.has_role(ServiceRole::PhiBridge));
    assert!(!caller.has_role(ServiceRole::TokenIssuer));
}

#[test]
fn unknown_token_is_refused() {
    let auth = authenticator();
    assert!(auth.authenticate(Some("Bearer nope")).is_none());
}

#[test]
fn malformed_headers_are_refused() {
    let auth = authenticator();
    assert!(auth.authenticate(None).is_none());
    assert!(auth.authenticate(Some("issuer-secret")).is_none());
    assert!(auth.authenticate(Some("Basic issuer-secret")).is_none());
}

#[test]
fn surrounding_whitespace_is_tolerated() {
    let auth = authenticator();
    assert!(auth.authenticate(Some("Bearer issuer-secret ")).is_some());
}
