// crates/phi-gate-adapters/src/webhook/tests.rs
// ============================================================================
// Module: Webhook Verification Tests
// Description: Signature and payload boundary tests.
// ============================================================================
//! ## Overview
//! Validates signature acceptance and rejection, and that parsing happens
//! only after a valid signature.

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

use super::WebhookError;
use super::WebhookVerifier;

const BODY: &[u8] = br#"{
    "event_id": "wamid.1001",
    "sender": "+1-555-0100",
    "text": "photo attached",
    "media": [
        {"url": "https://media.example/a.jpg", "content_type": "image/jpeg", "byte_size": 1024}
    ]
}"#;

#[test]
fn valid_signature_parses_the_event() {
    let verifier = WebhookVerifier::new(*b"transport-shared-secret");
    let signature = verifier.sign(BODY);
    let event = verifier.accept(BODY, &signature).unwrap();
    assert_eq!(event.event_id.as_str(), "wamid.1001");
    assert_eq!(event.media.len(), 1);
    assert_eq!(event.media[0].content_type, "image/jpeg");
}

#[test]
fn signature_is_case_insensitive_on_input() {
    let verifier = WebhookVerifier::new(*b"transport-shared-secret");
    let signature = verifier.sign(BODY).to_ascii_uppercase();
    assert!(verifier.verify(BODY, &signature));
}

#[test]
fn wrong_secret_is_rejected_before_parsing() {
    let signer = WebhookVerifier::new(*b"transport-shared-secret");
    let verifier = WebhookVerifier::new(*b"a-different-secret------");
    let signature = signer.sign(BODY);
    match verifier.accept(BODY, &signature) {
        Err(WebhookError::BadSignature) => {}
        other => panic!("expected bad signature, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn tampered_body_is_rejected() {
    let verifier = WebhookVerifier::new(*b"transport-shared-secret");
    let signature = verifier.sign(BODY);
    let mut tampered = BODY.to_vec();
    tampered[30] ^= 0x01;
    assert!(!verifier.verify(&tampered, &signature));
}

#[test]
fn malformed_body_with_valid_signature_is_rejected() {
    let verifier = WebhookVerifier::new(*b"transport-shared-secret");
    let body = b"not json at all";
    let signature = verifier.sign(body);
    match verifier.accept(body, &signature) {
        Err(WebhookError::Malformed(_)) => {}
        other => panic!("expected malformed, got {:?}", other.map(|_| ())),
    }
}
