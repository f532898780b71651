// crates/phi-gate-adapters/src/notify.rs
// ============================================================================
// Module: Notifier Adapters
// Description: Outbound clinical notification delivery.
// Purpose: Deliver alias-only notifications with bounded retries.
// Dependencies: async-trait, phi-gate-core, reqwest, serde, tokio, tracing
// ============================================================================

//! ## Overview
//! Two notifier implementations: [`WebhookNotifier`] posts templated
//! notifications to per-channel webhook URLs with up to three delivery
//! attempts and exponential backoff (permanent failure surfaces as a
//! non-retryable fault so the runner escalates), and [`ChannelNotifier`]
//! hands requests to an in-process channel for embedded deployments and
//! tests. Notifiers receive token aliases only; a hospital identity field
//! can never reach this module by construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use phi_gate_core::AdapterError;
use phi_gate_core::CancelSignal;
use phi_gate_core::Clock;
use phi_gate_core::DeliveryReceipt;
use phi_gate_core::NotificationRequest;
use phi_gate_core::Notifier;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

// ============================================================================
// SECTION: Webhook Notifier
// ============================================================================

/// Delivery attempts before permanent failure.
const DELIVERY_ATTEMPTS: u32 = 3;

/// Base backoff between delivery attempts (ms).
const DELIVERY_BACKOFF_MS: u64 = 250;

/// Wire body posted to a channel webhook.
#[derive(Debug, Serialize)]
struct NotificationWireBody<'a> {
    /// Channel routing label.
    channel: &'a str,
    /// Template identifier.
    template: &'a str,
    /// Urgency label.
    urgency: &'a str,
    /// Template parameters (token alias and coded labels only).
    params: &'a BTreeMap<String, String>,
}

/// Webhook-backed notifier with per-channel destinations.
///
/// # Invariants
/// - Unrouted channels fail closed rather than falling back to a default.
pub struct WebhookNotifier {
    /// Destination URL per channel routing label.
    channel_urls: BTreeMap<String, String>,
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Injected clock for receipts.
    clock: Arc<dyn Clock>,
}

impl WebhookNotifier {
    /// Creates the notifier over per-channel webhook URLs.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the HTTP client cannot be built.
    pub fn new(
        channel_urls: BTreeMap<String, String>,
        timeout_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| AdapterError::non_retryable(format!("http client build: {err}")))?;
        Ok(Self {
            channel_urls,
            client,
            clock,
        })
    }

    /// Posts one delivery attempt.
    async fn attempt(
        &self,
        url: &str,
        request: &NotificationRequest,
    ) -> Result<(), AdapterError> {
        let response = self
            .client
            .post(url)
            .json(&NotificationWireBody {
                channel: request.channel.as_str(),
                template: request.message_template_id.as_str(),
                urgency: request.urgency.as_str(),
                params: &request.template_params,
            })
            .send()
            .await
            .map_err(|err| AdapterError::transient(format!("notification post: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() {
            return Err(AdapterError::transient(format!("notification status {status}")));
        }
        Err(AdapterError::non_retryable(format!("notification status {status}")))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(
        &self,
        request: &NotificationRequest,
        cancel: &CancelSignal,
    ) -> Result<DeliveryReceipt, AdapterError> {
        let channel = request.channel.as_str();
        let url = self
            .channel_urls
            .get(channel)
            .ok_or_else(|| AdapterError::non_retryable(format!("unrouted channel {channel}")))?;

        let mut last_failure = String::new();
        for attempt in 1..=DELIVERY_ATTEMPTS {
            if cancel.is_canceled() {
                return Err(AdapterError::Canceled);
            }
            match self.attempt(url, request).await {
                Ok(()) => {
                    return Ok(DeliveryReceipt {
                        channel: channel.to_string(),
                        delivered_at: self.clock.now(),
                        provider_message_id: None,
                    });
                }
                Err(AdapterError::Canceled) => return Err(AdapterError::Canceled),
                Err(error @ AdapterError::Fault {
                    ..
                }) => {
                    if error.fault_kind().is_some_and(|kind| !kind.is_retryable()) {
                        return Err(error);
                    }
                    last_failure = error.to_string();
                    warn!(channel, attempt, %error, "notification attempt failed");
                }
            }
            if attempt < DELIVERY_ATTEMPTS {
                let backoff = DELIVERY_BACKOFF_MS << (attempt - 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }
        // Permanent failure after the bounded attempts: escalate.
        Err(AdapterError::non_retryable(format!(
            "notification delivery failed terminally: {last_failure}"
        )))
    }
}

// ============================================================================
// SECTION: Channel Notifier
// ============================================================================

/// In-process notifier handing requests to a channel consumer.
///
/// # Invariants
/// - Delivery succeeds only while a receiver is alive; a closed channel is
///   a transient fault.
pub struct ChannelNotifier {
    /// Delivery channel.
    sender: mpsc::UnboundedSender<NotificationRequest>,
    /// Injected clock for receipts.
    clock: Arc<dyn Clock>,
}

impl ChannelNotifier {
    /// Creates the notifier and its receiving end.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> (Self, mpsc::UnboundedReceiver<NotificationRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender,
                clock,
            },
            receiver,
        )
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn deliver(
        &self,
        request: &NotificationRequest,
        cancel: &CancelSignal,
    ) -> Result<DeliveryReceipt, AdapterError> {
        if cancel.is_canceled() {
            return Err(AdapterError::Canceled);
        }
        self.sender
            .send(request.clone())
            .map_err(|_| AdapterError::transient("notification channel closed"))?;
        Ok(DeliveryReceipt {
            channel: request.channel.as_str().to_string(),
            delivered_at: self.clock.now(),
            provider_message_id: None,
        })
    }
}
