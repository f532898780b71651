// crates/phi-gate-server/src/lib.rs
// ============================================================================
// Module: PHI Gate Server
// Description: Composition root and HTTP surface for the orchestration backbone.
// Purpose: Wire every crate together and serve the internal JSON API.
// Dependencies: axum, axum-server, phi-gate-*, tokio, tracing
// ============================================================================

//! ## Overview
//! The server is the composition root: it opens the three stores, builds
//! the tokenization bridge (running its reconciliation sweep before any
//! work), the input boundary, the session manager, the task runner with the
//! clinical workflow executor, and the dispatcher, then serves the
//! bearer-authenticated Tokenization API and the inbound transport webhook.
//! Background loops (session sweeper, queue deadline sweeper, dispatcher,
//! audit retention) run under one root cancellation signal.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Bearer authentication.
pub mod auth;
/// HTTP routes.
pub mod routes;
/// Shared handler state.
pub mod state;
/// Dependency-light metrics hooks.
pub mod telemetry;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use phi_gate_adapters::FollowUpModule;
use phi_gate_adapters::HttpDetector;
use phi_gate_adapters::HttpDetectorConfig;
use phi_gate_adapters::RiskModifierModule;
use phi_gate_adapters::SeverityGradingModule;
use phi_gate_adapters::StaticProtocolTable;
use phi_gate_adapters::WebhookNotifier;
use phi_gate_adapters::WebhookVerifier;
use phi_gate_config::GateConfig;
use phi_gate_core::ActorId;
use phi_gate_core::AdapterError;
use phi_gate_core::AuditLog;
use phi_gate_core::CancelSignal;
use phi_gate_core::Clock;
use phi_gate_core::DecisionEngine;
use phi_gate_core::DecisionModule;
use phi_gate_core::Detector;
use phi_gate_core::Notifier;
use phi_gate_core::ProcessingStore;
use phi_gate_core::QueueName;
use phi_gate_core::Stage;
use phi_gate_core::StoreError;
use phi_gate_core::SystemClock;
use phi_gate_core::Timestamp;
use phi_gate_core::TriageRules;
use phi_gate_queue::InputQueue;
use phi_gate_queue::Packager;
use phi_gate_queue::QueueError;
use phi_gate_queue::QueueKeyHolder;
use phi_gate_runtime::Dispatcher;
use phi_gate_runtime::InMemoryTokenDirectory;
use phi_gate_runtime::RunnerConfig;
use phi_gate_runtime::SessionManager;
use phi_gate_runtime::TaskFactory;
use phi_gate_runtime::TaskRunner;
use phi_gate_runtime::WorkflowExecutor;
use phi_gate_store_sqlite::SqliteAuditLog;
use phi_gate_store_sqlite::SqliteHospitalStore;
use phi_gate_store_sqlite::SqliteProcessingStore;
use phi_gate_tokenize::TokenizationService;
use phi_gate_tokenize::TokenizeError;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::auth::BearerAuthenticator;
use crate::state::AppState;
use crate::telemetry::NoopMetrics;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while assembling or serving the application.
///
/// # Invariants
/// - Variants are stable for operator-facing reporting.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A store failed to open or reconcile.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The input queue failed to open.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The tokenization bridge failed its startup sweep.
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),
    /// An adapter failed to construct.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// The listener failed to bind or serve.
    #[error("serve failure: {0}")]
    Serve(String),
}

// ============================================================================
// SECTION: Application
// ============================================================================

/// Milliseconds per second.
const MILLIS_PER_SECOND: u64 = 1_000;

/// Interval between audit retention sweeps.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(3_600);

/// Assembled application: router, shared state, and background loops.
pub struct Application {
    /// Shared handler state.
    pub state: AppState,
    /// Task runner handle for shutdown.
    runner: Arc<TaskRunner>,
    /// Root cancellation for background loops.
    root_cancel: CancelSignal,
    /// Configured bind address.
    bind_addr: String,
}

impl Application {
    /// Builds the full application from validated configuration. Must be
    /// called inside a Tokio runtime; background loops are spawned here.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError`] when a store, queue, or adapter cannot be
    /// constructed, or when the reconciliation sweep fails.
    pub fn build(config: &GateConfig) -> Result<Self, BootstrapError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let audit: Arc<dyn AuditLog> =
            Arc::new(SqliteAuditLog::open(&config.stores.audit_path)?);
        let hospital = Arc::new(SqliteHospitalStore::open(&config.stores.hospital_path)?);
        let processing: Arc<dyn ProcessingStore> =
            Arc::new(SqliteProcessingStore::open(&config.stores.processing_path)?);

        let tokenize = Arc::new(TokenizationService::new(
            hospital,
            Arc::clone(&processing),
            Arc::clone(&audit),
            Arc::clone(&clock),
            config.tokenization.alias_vocabulary_salt.clone(),
            config.tokenization.default_token_ttl_seconds * MILLIS_PER_SECOND,
            config.tokenization.reconciliation_grace_seconds * MILLIS_PER_SECOND,
        ));
        let reconciled = tokenize.reconcile(&ActorId::new("startup"))?;
        info!(reconciled, "tokenization reconciliation sweep complete");

        let packager = Arc::new(Packager::new(
            config.input_queue.sender_salt.as_bytes().to_vec(),
            config.input_queue.max_media_bytes,
        ));
        let queue = Arc::new(InputQueue::open(
            &config.input_queue.path,
            Arc::new(QueueKeyHolder::generate()),
            Arc::clone(&audit),
            Arc::clone(&clock),
            config.input_queue.deadline_seconds * MILLIS_PER_SECOND,
            config.input_queue.lease_seconds * MILLIS_PER_SECOND,
        )?);

        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&processing),
            Arc::clone(&audit),
            Arc::clone(&clock),
            config.session.ttl_seconds * MILLIS_PER_SECOND,
        ));

        let stage_deadlines: BTreeMap<Stage, u64> = config
            .task
            .deadline_seconds_by_stage
            .iter()
            .filter_map(|(label, seconds)| {
                Stage::parse(label).map(|stage| (stage, seconds * MILLIS_PER_SECOND))
            })
            .collect();
        let factory = TaskFactory::new(
            config.task.max_attempts,
            config.task.retry_delay_base_seconds * MILLIS_PER_SECOND,
            stage_deadlines,
            Arc::clone(&clock),
        );

        let modules: Vec<Box<dyn DecisionModule>> = vec![
            Box::new(SeverityGradingModule::new(Arc::new(StaticProtocolTable))),
            Box::new(RiskModifierModule),
            Box::new(FollowUpModule),
        ];
        let engine = Arc::new(DecisionEngine::new(
            modules,
            config.medical.confidence_escalation_threshold,
        ));
        let detector: Arc<dyn Detector> = Arc::new(HttpDetector::new(
            HttpDetectorConfig {
                endpoint: config.detector.endpoint.clone(),
                timeout_ms: config.detector.timeout_ms,
            },
            Arc::clone(&clock),
        )?);
        let notifier: Arc<dyn Notifier> = Arc::new(WebhookNotifier::new(
            config.notifier.channel_urls.clone(),
            config.notifier.timeout_ms,
            Arc::clone(&clock),
        )?);

        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&processing),
            Arc::clone(&sessions),
            detector,
            engine,
            notifier,
            Arc::clone(&audit),
            Arc::clone(&clock),
            factory.clone(),
        ));
        if config.worker.prefetch != 1 {
            warn!(prefetch = config.worker.prefetch, "prefetch is fixed at one task per worker");
        }
        let mut priority_order = QueueName::PRIORITY_ORDER;
        for (slot, label) in config.queues.priority_order.iter().enumerate() {
            if let Some(queue) = QueueName::parse(label)
                && let Some(target) = priority_order.get_mut(slot)
            {
                *target = queue;
            }
        }
        let runner = TaskRunner::new(
            executor,
            Arc::clone(&audit),
            Arc::clone(&clock),
            RunnerConfig {
                pool_size: config.worker.pool_size,
                min_share_percent: config.worker.min_share_percent,
                high_water_mark: config.queues.high_water_mark,
                enqueue_wait_ms: config.server.call_timeout_seconds * MILLIS_PER_SECOND,
                priority_order,
            },
        );
        let _worker_handles = runner.start();

        let directory = Arc::new(InMemoryTokenDirectory::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&directory) as Arc<dyn phi_gate_runtime::TokenDirectory>,
            Arc::clone(&sessions),
            Arc::clone(&processing),
            Arc::clone(&runner),
            factory,
            TriageRules::default(),
            Arc::clone(&audit),
            Arc::clone(&clock),
        ));

        let root_cancel = CancelSignal::new();
        tokio::spawn(Arc::clone(&sessions).run_sweeper(root_cancel.child()));
        {
            let dispatcher = Arc::clone(&dispatcher);
            let cancel = root_cancel.child();
            tokio::spawn(async move { dispatcher.run(cancel).await });
        }
        {
            let dispatcher = Arc::clone(&dispatcher);
            let cancel = root_cancel.child();
            tokio::spawn(async move { dispatcher.run_queue_sweeper(cancel).await });
        }
        spawn_retention_sweeper(
            Arc::clone(&audit),
            Arc::clone(&clock),
            u64::from(config.audit.retention_days),
            root_cancel.child(),
        );

        let state = AppState {
            tokenize,
            verifier: Arc::new(WebhookVerifier::new(
                config.server.webhook_secret.as_bytes().to_vec(),
            )),
            packager,
            queue,
            directory,
            auth: Arc::new(BearerAuthenticator::from_config(&config.server.auth_tokens)),
            audit,
            clock,
            metrics: Arc::new(NoopMetrics),
        };

        Ok(Self {
            state,
            runner,
            root_cancel,
            bind_addr: config.server.bind_addr.clone(),
        })
    }

    /// Serves the HTTP surface until the process is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Serve`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), BootstrapError> {
        let addr: std::net::SocketAddr = self
            .bind_addr
            .parse()
            .map_err(|err| BootstrapError::Serve(format!("bind address: {err}")))?;
        let router = routes::router(self.state.clone());
        info!(%addr, "phi-gate listening");
        let result = axum_server::bind(addr)
            .serve(router.into_make_service())
            .await
            .map_err(|err| BootstrapError::Serve(err.to_string()));
        self.shutdown();
        result
    }

    /// Cancels background loops and drains the runner.
    pub fn shutdown(&self) {
        self.root_cancel.cancel();
        self.runner.shutdown();
    }
}

// ============================================================================
// SECTION: Retention Sweeper
// ============================================================================

/// Milliseconds per day.
const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1_000;

/// Spawns the hourly audit retention sweep.
fn spawn_retention_sweeper(
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    retention_days: u64,
    cancel: CancelSignal,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if cancel.is_canceled() {
                return;
            }
            let cutoff = Timestamp::from_unix_millis(
                clock
                    .now()
                    .as_unix_millis()
                    .saturating_sub(i64::try_from(retention_days * MILLIS_PER_DAY).unwrap_or(0)),
            );
            match audit.prune_older_than(cutoff) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "audit retention sweep pruned entries"),
                Err(error) => warn!(%error, "audit retention sweep failed"),
            }
        }
    });
}
