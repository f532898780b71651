// crates/phi-gate-adapters/tests/notify_delivery.rs
// ============================================================================
// Module: Notifier Delivery Tests
// Description: Retry and failure-classification tests over a local server.
// ============================================================================
//! ## Overview
//! Exercises the webhook notifier against a local HTTP server: transient
//! server errors are retried within the bounded attempts, client errors fail
//! immediately, and unrouted channels fail closed.

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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use phi_gate_core::AdapterError;
use phi_gate_core::CancelSignal;
use phi_gate_core::FaultKind;
use phi_gate_core::MessageTemplate;
use phi_gate_core::NotificationChannel;
use phi_gate_core::NotificationRequest;
use phi_gate_core::Notifier;
use phi_gate_core::SessionId;
use phi_gate_core::SystemClock;
use phi_gate_core::TokenId;
use phi_gate_core::Urgency;
use phi_gate_adapters::ChannelNotifier;
use phi_gate_adapters::WebhookNotifier;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Serves scripted status codes, one per request, then stops.
fn scripted_server(statuses: Vec<u16>) -> (String, thread::JoinHandle<usize>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let url = format!("http://{}/hook", server.server_addr().to_ip().unwrap());
    let handle = thread::spawn(move || {
        let mut served = 0;
        for status in statuses {
            let Ok(request) = server.recv() else {
                break;
            };
            served += 1;
            let response = tiny_http::Response::empty(status);
            let _ = request.respond(response);
        }
        served
    });
    (url, handle)
}

fn request() -> NotificationRequest {
    NotificationRequest {
        session_id: SessionId::new("sess-1"),
        token_id: TokenId::new("0123456789abcdef0123456789abcdef"),
        urgency: Urgency::Routine,
        channel: NotificationChannel::MedicalRoutine,
        message_template_id: MessageTemplate::RoutineSummary,
        template_params: BTreeMap::from([("alias".to_string(), "Amber Falcon".to_string())]),
    }
}

fn notifier_for(url: String) -> WebhookNotifier {
    WebhookNotifier::new(
        BTreeMap::from([(NotificationChannel::MedicalRoutine.as_str().to_string(), url)]),
        2_000,
        Arc::new(SystemClock),
    )
    .unwrap()
}

// ============================================================================
// SECTION: Webhook Delivery
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn transient_server_errors_are_retried_to_success() {
    let (url, handle) = scripted_server(vec![500, 500, 200]);
    let notifier = notifier_for(url);
    let receipt = notifier.deliver(&request(), &CancelSignal::new()).await.unwrap();
    assert_eq!(receipt.channel, "#medical-routine");
    assert_eq!(handle.join().unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn persistent_server_errors_fail_terminally() {
    let (url, handle) = scripted_server(vec![500, 500, 500]);
    let notifier = notifier_for(url);
    match notifier.deliver(&request(), &CancelSignal::new()).await {
        Err(AdapterError::Fault {
            kind, ..
        }) => assert_eq!(kind, FaultKind::NonRetryable),
        other => panic!("expected terminal failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(handle.join().unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_fail_without_retry() {
    let (url, handle) = scripted_server(vec![404]);
    let notifier = notifier_for(url);
    match notifier.deliver(&request(), &CancelSignal::new()).await {
        Err(AdapterError::Fault {
            kind, ..
        }) => assert_eq!(kind, FaultKind::NonRetryable),
        other => panic!("expected client failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(handle.join().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unrouted_channel_fails_closed() {
    let notifier = WebhookNotifier::new(BTreeMap::new(), 2_000, Arc::new(SystemClock)).unwrap();
    match notifier.deliver(&request(), &CancelSignal::new()).await {
        Err(AdapterError::Fault {
            kind, ..
        }) => assert_eq!(kind, FaultKind::NonRetryable),
        other => panic!("expected unrouted failure, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn canceled_delivery_returns_canceled() {
    let (url, _handle) = scripted_server(vec![200]);
    let notifier = notifier_for(url);
    let cancel = CancelSignal::new();
    cancel.cancel();
    match notifier.deliver(&request(), &cancel).await {
        Err(AdapterError::Canceled) => {}
        other => panic!("expected canceled, got {:?}", other.map(|_| ())),
    }
}

// ============================================================================
// SECTION: Channel Delivery
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn channel_notifier_hands_requests_to_the_receiver() {
    let (notifier, mut receiver) = ChannelNotifier::new(Arc::new(SystemClock));
    notifier.deliver(&request(), &CancelSignal::new()).await.unwrap();
    let delivered = receiver.recv().await.unwrap();
    assert_eq!(delivered.channel, NotificationChannel::MedicalRoutine);
}
