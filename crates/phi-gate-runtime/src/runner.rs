// crates/phi-gate-runtime/src/runner.rs
// ============================================================================
// Module: Async Task Runner
// Description: Priority-queued worker pool with medical-grade failure policy.
// Purpose: Execute staged workflows with bounded retries and escalation.
// Dependencies: async-trait, phi-gate-core, rand, tokio, tracing
// ============================================================================

//! ## Overview
//! Four named queues drain in strict priority order through a fixed worker
//! pool. Starvation is bounded by reserving a minimum concurrency share per
//! queue (default ten percent of pool capacity, at least one slot). Workers
//! prefetch exactly one task. Acknowledgement is late: downstream workflow
//! tasks are scheduled only after the producing task succeeds. Failures
//! retry with jittered exponential backoff up to the attempt cap; exhaustion
//! and non-retryable faults escalate to the human review queue with exactly
//! one `escalated` audit entry. Cancellation is cooperative and terminal but
//! is not a failure: no retry, no escalation. A task that reaches its
//! deadline is canceled, not retried.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use phi_gate_core::ActorId;
use phi_gate_core::AdapterError;
use phi_gate_core::AuditAction;
use phi_gate_core::AuditLog;
use phi_gate_core::AuditOutcome;
use phi_gate_core::AuditRecord;
use phi_gate_core::CancelSignal;
use phi_gate_core::Clock;
use phi_gate_core::Component;
use phi_gate_core::CorrelationId;
use phi_gate_core::FaultKind;
use phi_gate_core::QueueName;
use phi_gate_core::Stage;
use phi_gate_core::TaskDisposition;
use phi_gate_core::TaskId;
use phi_gate_core::TaskSpec;
use phi_gate_core::Timestamp;
use phi_gate_core::retry_delay_ms;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

// ============================================================================
// SECTION: Executor Contract
// ============================================================================

/// Result of a successfully executed stage.
///
/// # Invariants
/// - `downstream` tasks are scheduled only after this stage acks.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Workflow tasks produced by this stage.
    pub downstream: Vec<TaskSpec>,
}

/// Host-provided stage implementation.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Executes one task stage.
    ///
    /// Implementations must poll `cancel` at checkpoints and return
    /// [`AdapterError::Canceled`] promptly once it latches.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] on cancellation or failure; the runner maps
    /// the fault kind onto retry and escalation policy.
    async fn execute(
        &self,
        task: &TaskSpec,
        cancel: &CancelSignal,
    ) -> Result<StageOutput, AdapterError>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors returned by the runner's scheduling surface.
///
/// # Invariants
/// - `Saturated` is transient; callers may retry after backoff.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Queue stayed at its high-water mark for the bounded wait.
    #[error("queue {0} saturated past the bounded wait")]
    Saturated(&'static str),
    /// Runner is shutting down and accepts no new work.
    #[error("runner is shut down")]
    Shutdown,
    /// Internal scheduling lock was poisoned.
    #[error("runner lock poisoned")]
    Lock,
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Runner tuning knobs.
///
/// # Invariants
/// - Validated upstream by the configuration crate; the runner clamps the
///   reserved share to at least one slot per queue.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Number of concurrent workers.
    pub pool_size: usize,
    /// Minimum concurrency share reserved per queue, in percent.
    pub min_share_percent: u8,
    /// Per-queue depth above which enqueues block.
    pub high_water_mark: usize,
    /// Bounded wait before an enqueue reports saturation, in milliseconds.
    pub enqueue_wait_ms: u64,
    /// Strict draw order across queues, highest priority first.
    pub priority_order: [QueueName; 4],
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            min_share_percent: 10,
            high_water_mark: 64,
            enqueue_wait_ms: 5_000,
            priority_order: QueueName::PRIORITY_ORDER,
        }
    }
}

// ============================================================================
// SECTION: Scheduling State
// ============================================================================

/// One scheduled task with its cancellation scope.
struct ScheduledTask {
    /// Task specification.
    spec: TaskSpec,
    /// Instant the task becomes deliverable.
    ready_at: Timestamp,
    /// Cancellation scope derived from the owning session.
    cancel: CancelSignal,
}

/// Backlog and in-flight accounting for one queue.
#[derive(Default)]
struct QueueLane {
    /// Tasks awaiting delivery, FIFO with per-task ready instants.
    backlog: VecDeque<ScheduledTask>,
    /// Tasks currently held by workers.
    running: usize,
}

/// Scheduling state behind the runner lock.
#[derive(Default)]
struct Lanes {
    /// One lane per queue, indexed by priority order.
    lanes: [QueueLane; 4],
}

impl Lanes {
    /// Total number of tasks currently held by workers.
    fn total_running(&self) -> usize {
        self.lanes.iter().map(|lane| lane.running).sum()
    }
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Priority-queued, multi-consumer task runner.
///
/// # Invariants
/// - A worker draws by strict priority among queues it may enter.
/// - Each queue can always use its reserved concurrency share.
/// - Downstream tasks are scheduled only after the producer acks.
pub struct TaskRunner {
    /// Scheduling state.
    lanes: Mutex<Lanes>,
    /// Worker and backpressure wakeups.
    notify: Notify,
    /// Stage executor.
    executor: Arc<dyn StageExecutor>,
    /// Audit log.
    audit: Arc<dyn AuditLog>,
    /// Injected clock.
    clock: Arc<dyn Clock>,
    /// Tuning knobs.
    config: RunnerConfig,
    /// Reserved slots per queue.
    reserved: usize,
    /// Shutdown latch.
    shutdown: CancelSignal,
}

impl TaskRunner {
    /// Creates a runner over an executor, audit log, and clock.
    #[must_use]
    pub fn new(
        executor: Arc<dyn StageExecutor>,
        audit: Arc<dyn AuditLog>,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Arc<Self> {
        let reserved = (config.pool_size * usize::from(config.min_share_percent) / 100).max(1);
        Arc::new(Self {
            lanes: Mutex::new(Lanes::default()),
            notify: Notify::new(),
            executor,
            audit,
            clock,
            config,
            reserved,
            shutdown: CancelSignal::new(),
        })
    }

    /// Starts the worker pool.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.pool_size)
            .map(|worker_index| {
                let runner = Arc::clone(self);
                tokio::spawn(async move { runner.worker_loop(worker_index).await })
            })
            .collect()
    }

    /// Latches shutdown; workers exit after their current task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }

    /// Schedules a task, blocking for a bounded wait when the queue is at
    /// its high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Saturated`] when the queue stays full past the
    /// bounded wait, and [`RunnerError::Shutdown`] during shutdown.
    pub async fn enqueue(&self, spec: TaskSpec, cancel: CancelSignal) -> Result<(), RunnerError> {
        let wait_deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.enqueue_wait_ms);
        loop {
            if self.shutdown.is_canceled() {
                return Err(RunnerError::Shutdown);
            }
            {
                let mut lanes = self.lanes.lock().map_err(|_| RunnerError::Lock)?;
                let lane = &mut lanes.lanes[spec.queue.priority_index()];
                if lane.backlog.len() + lane.running < self.config.high_water_mark {
                    let queue_label = spec.queue.as_str();
                    self.record_task_audit(
                        &spec,
                        AuditAction::TaskEnqueued,
                        AuditOutcome::Ok,
                        Some(spec.stage.as_str().to_string()),
                    );
                    lane.backlog.push_back(ScheduledTask {
                        ready_at: self.clock.now(),
                        spec,
                        cancel,
                    });
                    drop(lanes);
                    self.notify.notify_waiters();
                    info!(queue = queue_label, "task enqueued");
                    return Ok(());
                }
            }
            if tokio::time::Instant::now() >= wait_deadline {
                return Err(RunnerError::Saturated(spec.queue.as_str()));
            }
            let _ = tokio::time::timeout(Duration::from_millis(20), self.notify.notified()).await;
        }
    }

    /// Returns the backlog depth of each queue in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Lock`] when the scheduling lock is poisoned.
    pub fn depths(&self) -> Result<[usize; 4], RunnerError> {
        let lanes = self.lanes.lock().map_err(|_| RunnerError::Lock)?;
        Ok([
            lanes.lanes[0].backlog.len(),
            lanes.lanes[1].backlog.len(),
            lanes.lanes[2].backlog.len(),
            lanes.lanes[3].backlog.len(),
        ])
    }

    // ------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------

    /// One worker: draw by priority, execute, repeat until shutdown.
    async fn worker_loop(self: Arc<Self>, worker_index: usize) {
        info!(worker = worker_index, "worker started");
        loop {
            if self.shutdown.is_canceled() {
                return;
            }
            let picked = match self.pick() {
                Ok(picked) => picked,
                Err(error) => {
                    warn!(%error, "worker cannot access scheduling state");
                    return;
                }
            };
            match picked {
                Some(task) => {
                    let queue = task.spec.queue;
                    self.process(task).await;
                    self.release_slot(queue);
                    self.notify.notify_waiters();
                }
                None => {
                    let _ =
                        tokio::time::timeout(Duration::from_millis(20), self.notify.notified())
                            .await;
                }
            }
        }
    }

    /// Draws the highest-priority ready task this worker may take.
    fn pick(&self) -> Result<Option<ScheduledTask>, RunnerError> {
        let now = self.clock.now();
        let mut lanes = self.lanes.lock().map_err(|_| RunnerError::Lock)?;
        for queue in self.config.priority_order {
            let queue_index = queue.priority_index();
            if !Self::may_draw(&lanes, queue_index, self.reserved, self.config.pool_size) {
                continue;
            }
            let position = lanes.lanes[queue_index]
                .backlog
                .iter()
                .position(|task| now.reached(task.ready_at));
            if let Some(position) = position
                && let Some(task) = lanes.lanes[queue_index].backlog.remove(position)
            {
                lanes.lanes[queue_index].running += 1;
                return Ok(Some(task));
            }
        }
        Ok(None)
    }

    /// Starvation bound: a queue can always use its reserved share; beyond
    /// it, a draw must leave the unused reserved slots of other backlogged
    /// queues available.
    fn may_draw(lanes: &Lanes, queue_index: usize, reserved: usize, pool_size: usize) -> bool {
        let total = lanes.total_running();
        if total >= pool_size {
            return false;
        }
        if lanes.lanes[queue_index].running < reserved {
            return true;
        }
        let withheld: usize = lanes
            .lanes
            .iter()
            .enumerate()
            .filter(|(other, lane)| *other != queue_index && !lane.backlog.is_empty())
            .map(|(_, lane)| reserved.saturating_sub(lane.running))
            .sum();
        total + withheld < pool_size
    }

    /// Releases a worker slot for a queue.
    fn release_slot(&self, queue: QueueName) {
        if let Ok(mut lanes) = self.lanes.lock() {
            let lane = &mut lanes.lanes[queue.priority_index()];
            lane.running = lane.running.saturating_sub(1);
        }
    }

    /// Executes one task and applies the failure policy.
    async fn process(&self, task: ScheduledTask) {
        let ScheduledTask {
            spec,
            cancel,
            ..
        } = task;

        if cancel.is_canceled() {
            self.finish_canceled(&spec, "session");
            return;
        }
        let now = self.clock.now();
        if now.reached(spec.deadline) {
            self.finish_canceled(&spec, "deadline");
            return;
        }

        let remaining = Duration::from_millis(spec.deadline.millis_since(now));
        let outcome =
            tokio::time::timeout(remaining, self.executor.execute(&spec, &cancel)).await;
        match outcome {
            Ok(Ok(output)) => {
                self.record_task_audit(
                    &spec,
                    AuditAction::TaskSucceeded,
                    AuditOutcome::Ok,
                    Some(spec.stage.as_str().to_string()),
                );
                for downstream in output.downstream {
                    self.schedule_downstream(downstream, cancel.child());
                }
            }
            Ok(Err(AdapterError::Canceled)) => self.finish_canceled(&spec, "signal"),
            Ok(Err(AdapterError::Fault {
                kind,
                message,
            })) => self.handle_fault(spec, cancel, kind, &message),
            Err(_elapsed) => self.finish_canceled(&spec, "deadline"),
        }
    }

    /// Applies retry or escalation policy to a failed task.
    fn handle_fault(&self, spec: TaskSpec, cancel: CancelSignal, kind: FaultKind, message: &str) {
        if kind.is_retryable() && spec.can_retry() {
            let jitter = rand::thread_rng().gen_range(-100_i32..=100);
            let delay = retry_delay_ms(spec.retry_delay_base_ms, spec.attempt, jitter);
            let mut retried = spec;
            retried.attempt += 1;
            self.record_task_audit(
                &retried,
                AuditAction::TaskRetried,
                AuditOutcome::Failed,
                Some(format!("attempt_{}", retried.attempt)),
            );
            let ready_at = self.clock.now().saturating_add_millis(delay);
            if let Ok(mut lanes) = self.lanes.lock() {
                lanes.lanes[retried.queue.priority_index()].backlog.push_back(ScheduledTask {
                    spec: retried,
                    ready_at,
                    cancel,
                });
            }
            return;
        }
        self.escalate(&spec, cancel, kind, message);
    }

    /// Escalates a terminally failed task to human review.
    fn escalate(&self, spec: &TaskSpec, cancel: CancelSignal, kind: FaultKind, message: &str) {
        warn!(
            task = spec.task_id.as_str(),
            stage = spec.stage.as_str(),
            kind = kind.as_str(),
            message,
            "task escalated"
        );
        self.record_task_audit(
            spec,
            AuditAction::TaskEscalated,
            AuditOutcome::Escalated,
            Some(kind.as_str().to_string()),
        );
        if spec.stage == Stage::HumanReview {
            // A failed review handoff has nowhere further to go; the audit
            // trail carries the escalation.
            return;
        }
        let review = TaskSpec {
            task_id: TaskId::new(format!("task-{}", Uuid::new_v4())),
            queue: QueueName::MedicalPriority,
            session_id: spec.session_id.clone(),
            token_id: spec.token_id.clone(),
            stage: Stage::HumanReview,
            payload: serde_json::json!({
                "escalated_from": spec.stage.as_str(),
                "fault_kind": kind.as_str(),
            }),
            attempt: 1,
            max_attempts: spec.max_attempts,
            retry_delay_base_ms: spec.retry_delay_base_ms,
            deadline: self.clock.now().saturating_add_millis(300_000),
            correlation_id: spec.correlation_id.clone(),
        };
        self.schedule_downstream(review, cancel);
    }

    /// Schedules a workflow continuation, bypassing the high-water gate so
    /// in-flight chains always drain.
    fn schedule_downstream(&self, spec: TaskSpec, cancel: CancelSignal) {
        self.record_task_audit(
            &spec,
            AuditAction::TaskEnqueued,
            AuditOutcome::Ok,
            Some(spec.stage.as_str().to_string()),
        );
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.lanes[spec.queue.priority_index()].backlog.push_back(ScheduledTask {
                ready_at: self.clock.now(),
                spec,
                cancel,
            });
        }
        self.notify.notify_waiters();
    }

    /// Records a cooperative cancellation: terminal, not a failure.
    fn finish_canceled(&self, spec: &TaskSpec, reason: &str) {
        self.record_task_audit(
            spec,
            AuditAction::TaskCanceled,
            AuditOutcome::Canceled,
            Some(reason.to_string()),
        );
        info!(
            task = spec.task_id.as_str(),
            stage = spec.stage.as_str(),
            reason,
            disposition = TaskDisposition::Canceled.as_str(),
            "task canceled"
        );
    }

    /// Emits one task audit record.
    fn record_task_audit(
        &self,
        spec: &TaskSpec,
        action: AuditAction,
        outcome: AuditOutcome,
        detail: Option<String>,
    ) {
        let record = AuditRecord {
            timestamp: self.clock.now(),
            actor_id: ActorId::new("task_runner"),
            token_id: Some(spec.token_id.clone()),
            action,
            component: Component::TaskRunner,
            outcome,
            correlation_id: CorrelationId::new(spec.correlation_id.as_str()),
            detail,
        };
        if let Err(error) = self.audit.append(&record) {
            warn!(%error, action = record.action.as_str(), "audit append failed");
        }
    }
}
