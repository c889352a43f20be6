//! Scheduler implementation
//!
//! A [`Scheduler`] is a cheap handle. All scheduling state lives in a single
//! [`Dispatcher`] task: the queue, the active count, the backoff window and
//! the auth breaker are only ever touched from that task, so dispatch
//! decisions can never race each other. Thunks run as their own tasks and
//! report back over a channel.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::id::generate_item_id;

use super::backoff::{BackoffPolicy, BackoffState, RetryDecision, spend_retry};
use super::breaker::{AuthCircuitBreaker, AuthStatus};
use super::classify::{classify, is_network_retryable};
use super::config::{AUTH_FAILURE_THRESHOLD, CircuitOpenPolicy, SchedulerConfig};
use super::failure::{Failure, FailureClass, SchedulerError};
use super::item::{Attempt, ItemMeta, Job, Task, WorkItem};
use super::pacing::{Gate, PacingGate};
use super::queue::PriorityQueue;

/// Per-submission overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Lower runs first; scheduler default when None
    pub priority: Option<u32>,
    /// Retry budget; scheduler default when None
    pub max_retries: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Read-only snapshot for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    pub queue_length: usize,
    pub active_requests: usize,
    pub max_concurrent: usize,
    /// End of the shared backoff window, while one is running
    pub rate_limited_until: Option<Instant>,
    /// Throttled attempts since the last success
    pub consecutive_rate_limits: u32,
    pub last_success: Option<Instant>,
    pub auth_tripped: bool,
    pub consecutive_auth_failures: u32,
    pub total_submitted: u64,
    pub total_dispatched: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_retried: u64,
    pub total_cancelled: u64,
    pub peak_concurrent: usize,
}

/// Handle to a submitted work item.
pub struct Submission<T> {
    id: String,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Receiver<Result<T, SchedulerError>>,
}

impl<T> Submission<T> {
    /// Opaque id used in log output.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the scheduler not to run this item. Has no effect once the item
    /// has been dispatched; in-flight work always runs to completion.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Wait for the item to settle.
    pub async fn wait(self) -> Result<T, SchedulerError> {
        // Sender dropped without settling: the dispatcher is gone
        self.reply.await.unwrap_or(Err(SchedulerError::Shutdown))
    }
}

enum Command {
    Enqueue(WorkItem),
    AuthRecovered,
}

struct Completion {
    meta: ItemMeta,
    outcome: Outcome,
}

enum Outcome {
    Finished(Attempt),
    Panicked,
}

/// Resilient request scheduler handle.
///
/// Must be created inside a tokio runtime. When the last handle is dropped
/// the dispatcher finishes queued and in-flight work and exits.
#[derive(Clone)]
pub struct Scheduler {
    default_priority: u32,
    default_max_retries: u32,
    on_circuit_open: CircuitOpenPolicy,
    commands: mpsc::UnboundedSender<Command>,
    stats_rx: watch::Receiver<SchedulerStats>,
    auth_rx: watch::Receiver<AuthStatus>,
}

impl Scheduler {
    /// Create a scheduler and spawn its dispatch loop.
    pub fn new(config: SchedulerConfig) -> Self {
        debug!(?config, "Scheduler::new: called");
        if let Err(reason) = config.validate() {
            warn!(%reason, "Scheduler::new: invalid config, clamping");
        }
        let max_concurrent = config.max_concurrent.max(1);
        let default_max_retries = config.max_retries.max(1);
        let backoff_max_ms = config.backoff_max_ms.max(config.backoff_base_ms);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats_rx) = watch::channel(SchedulerStats::default());

        let breaker = AuthCircuitBreaker::new(AUTH_FAILURE_THRESHOLD);
        let auth_rx = breaker.subscribe();

        let dispatcher = Dispatcher {
            gate: PacingGate::new(max_concurrent, config.min_delay()),
            backoff: BackoffState::new(BackoffPolicy::new(
                Duration::from_millis(config.backoff_base_ms),
                Duration::from_millis(backoff_max_ms),
            )),
            breaker,
            queue: PriorityQueue::new(),
            on_circuit_open: config.on_circuit_open,
            active: 0,
            last_dispatch: None,
            stats: SchedulerStats::default(),
            stats_tx,
            commands: commands_rx,
            accepting: true,
            completions_tx,
            completions_rx,
        };
        tokio::spawn(dispatcher.run());

        Self {
            default_priority: config.default_priority,
            default_max_retries,
            on_circuit_open: config.on_circuit_open,
            commands,
            stats_rx,
            auth_rx,
        }
    }

    /// Submit work and get a handle to its eventual result.
    ///
    /// `execute` is called once per attempt, so it must be able to build a
    /// fresh future each time it is retried.
    pub fn submit<T, F, Fut>(&self, execute: F, options: EnqueueOptions) -> Submission<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        let priority = options.priority.unwrap_or(self.default_priority);
        let max_retries = options.max_retries.unwrap_or(self.default_max_retries).max(1);
        let meta = ItemMeta::new(generate_item_id(), priority, max_retries);
        let (reply_tx, reply_rx) = oneshot::channel();

        let submission = Submission {
            id: meta.id.clone(),
            cancelled: meta.cancelled.clone(),
            reply: reply_rx,
        };

        let item = WorkItem {
            meta,
            job: Box::new(Task::new(execute, reply_tx)),
        };

        if self.on_circuit_open == CircuitOpenPolicy::Reject && self.auth_rx.borrow().tripped {
            debug!(item_id = %submission.id, "Scheduler::submit: breaker tripped, rejecting");
            item.job.reject(SchedulerError::CircuitOpen);
            return submission;
        }

        debug!(item_id = %submission.id, priority, max_retries, "Scheduler::submit: queued");
        if let Err(mpsc::error::SendError(Command::Enqueue(item))) = self.commands.send(Command::Enqueue(item)) {
            item.job.reject(SchedulerError::Shutdown);
        }
        submission
    }

    /// Submit work and wait for its result.
    pub async fn enqueue<T, F, Fut>(&self, execute: F, options: EnqueueOptions) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    {
        self.submit(execute, options).wait().await
    }

    /// Snapshot of queue depth, in-flight count and throttle window.
    pub fn stats(&self) -> SchedulerStats {
        self.stats_rx.borrow().clone()
    }

    /// Signal that the user has re-authenticated; clears the auth breaker.
    pub fn notify_auth_recovered(&self) {
        debug!("Scheduler::notify_auth_recovered: called");
        let _ = self.commands.send(Command::AuthRecovered);
    }

    pub fn auth_status(&self) -> AuthStatus {
        *self.auth_rx.borrow()
    }

    /// Watch the auth breaker; caching layers pause while it is tripped.
    pub fn subscribe_auth(&self) -> watch::Receiver<AuthStatus> {
        self.auth_rx.clone()
    }
}

enum Wake {
    /// Nothing to do until a command or completion arrives
    Idle,
    /// Re-check after this long
    After(Duration),
}

struct Dispatcher {
    gate: PacingGate,
    backoff: BackoffState,
    breaker: AuthCircuitBreaker,
    queue: PriorityQueue<WorkItem>,
    on_circuit_open: CircuitOpenPolicy,
    active: usize,
    last_dispatch: Option<Instant>,
    stats: SchedulerStats,
    stats_tx: watch::Sender<SchedulerStats>,
    commands: mpsc::UnboundedReceiver<Command>,
    accepting: bool,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Dispatcher {
    async fn run(mut self) {
        debug!("Dispatcher::run: started");
        loop {
            let wake = self.pump();
            self.publish_stats();

            if !self.accepting && self.active == 0 && (self.queue.is_empty() || self.breaker.is_tripped()) {
                break;
            }

            let sleep_for = match wake {
                Wake::Idle => None,
                Wake::After(d) => Some(d),
            };

            tokio::select! {
                cmd = self.commands.recv(), if self.accepting => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    None => {
                        debug!("Dispatcher::run: all handles dropped, draining");
                        self.accepting = false;
                    }
                },
                Some(done) = self.completions_rx.recv() => self.on_completion(done),
                _ = sleep_or_pending(sleep_for) => {}
            }
        }

        for item in self.queue.drain() {
            item.job.reject(SchedulerError::Shutdown);
        }
        self.publish_stats();
        info!(
            dispatched = self.stats.total_dispatched,
            succeeded = self.stats.total_succeeded,
            failed = self.stats.total_failed,
            "Dispatcher stopped"
        );
    }

    /// Dispatch as much as the breaker, backoff and pacing gate allow.
    fn pump(&mut self) -> Wake {
        loop {
            if self.breaker.is_tripped() {
                return Wake::Idle;
            }
            if self.queue.is_empty() {
                return Wake::Idle;
            }

            let now = Instant::now();
            if let Some(remaining) = self.backoff.remaining(now) {
                return Wake::After(remaining);
            }

            match self.gate.check(self.active, self.last_dispatch, now) {
                Gate::Saturated => return Wake::Idle,
                Gate::Wait(d) => return Wake::After(d),
                Gate::Open => {}
            }

            let Some(item) = self.queue.pop() else {
                return Wake::Idle;
            };

            if item.should_skip() {
                debug!(item_id = %item.meta.id, "Dispatcher::pump: skipping cancelled item");
                self.stats.total_cancelled += 1;
                item.job.reject(SchedulerError::Cancelled);
                continue;
            }

            self.dispatch(item, now);
        }
    }

    fn dispatch(&mut self, item: WorkItem, now: Instant) {
        self.active += 1;
        self.last_dispatch = Some(now);
        self.stats.total_dispatched += 1;
        self.stats.peak_concurrent = self.stats.peak_concurrent.max(self.active);

        let WorkItem { meta, job } = item;
        debug!(
            item_id = %meta.id,
            priority = meta.priority,
            retries_remaining = meta.retries_remaining,
            active = self.active,
            "Dispatching"
        );

        let attempt = AssertUnwindSafe(job.run()).catch_unwind();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let outcome = match attempt.await {
                Ok(attempt) => Outcome::Finished(attempt),
                Err(_) => Outcome::Panicked,
            };
            let _ = completions.send(Completion { meta, outcome });
        });
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Enqueue(item) => {
                self.stats.total_submitted += 1;
                // The breaker may have tripped after the handle checked it
                if self.breaker.is_tripped() && self.on_circuit_open == CircuitOpenPolicy::Reject {
                    debug!(item_id = %item.meta.id, "Dispatcher::on_command: breaker tripped, rejecting");
                    self.stats.total_failed += 1;
                    item.job.reject(SchedulerError::CircuitOpen);
                    return;
                }
                self.queue.push(item.meta.priority, item);
                self.stats.queue_length = self.queue.len();
            }
            Command::AuthRecovered => {
                info!("Auth recovery signalled");
                self.breaker.recover();
            }
        }
    }

    fn on_completion(&mut self, done: Completion) {
        self.active = self.active.saturating_sub(1);
        let Completion { meta, outcome } = done;
        let now = Instant::now();

        match outcome {
            Outcome::Finished(Attempt::Succeeded) => {
                debug!(item_id = %meta.id, attempts = meta.attempts(), "Succeeded");
                self.stats.total_succeeded += 1;
                self.breaker.record_success();
                self.backoff.record_success(now);
            }
            Outcome::Finished(Attempt::Failed { job, failure }) => self.on_failure(meta, job, failure, now),
            Outcome::Panicked => {
                tracing::error!(item_id = %meta.id, "Work item panicked");
                self.stats.total_failed += 1;
            }
        }
    }

    fn on_failure(&mut self, mut meta: ItemMeta, job: Box<dyn Job>, failure: Failure, now: Instant) {
        let class = classify(&failure);
        let attempts = meta.attempts();
        self.breaker.record_outcome(class);

        match class {
            FailureClass::AuthFailure => {
                warn!(item_id = %meta.id, %failure, "Auth failure, rejecting");
                self.stats.total_failed += 1;
                job.reject(SchedulerError::AuthFailure { attempts, cause: failure });
            }
            FailureClass::RateLimited => {
                let decision = self.backoff.on_rate_limited(&mut meta, failure.retry_after, now);
                self.retry_or_reject(meta, job, decision, || SchedulerError::RateLimitExhausted {
                    attempts,
                    cause: failure,
                });
            }
            FailureClass::Normal if is_network_retryable(&failure) => {
                warn!(item_id = %meta.id, %failure, "Network failure");
                let decision = spend_retry(&mut meta);
                self.retry_or_reject(meta, job, decision, || SchedulerError::Failed { attempts, cause: failure });
            }
            FailureClass::Normal => {
                debug!(item_id = %meta.id, %failure, "Failed");
                self.stats.total_failed += 1;
                job.reject(SchedulerError::Failed { attempts, cause: failure });
            }
        }
    }

    fn retry_or_reject(
        &mut self,
        meta: ItemMeta,
        job: Box<dyn Job>,
        decision: RetryDecision,
        error: impl FnOnce() -> SchedulerError,
    ) {
        match decision {
            RetryDecision::Retry { priority } => {
                debug!(
                    item_id = %meta.id,
                    priority,
                    retries_remaining = meta.retries_remaining,
                    "Retry scheduled"
                );
                self.stats.total_retried += 1;
                self.queue.push_front(priority, WorkItem { meta, job });
            }
            RetryDecision::Exhausted => {
                warn!(item_id = %meta.id, "Retries exhausted");
                self.stats.total_failed += 1;
                job.reject(error());
            }
        }
    }

    fn publish_stats(&mut self) {
        let now = Instant::now();
        self.stats.queue_length = self.queue.len();
        self.stats.active_requests = self.active;
        self.stats.max_concurrent = self.gate.max_concurrent();
        self.stats.rate_limited_until = self.backoff.throttled_until(now);
        self.stats.consecutive_rate_limits = self.backoff.consecutive_hits();
        self.stats.last_success = self.backoff.last_success();
        self.stats.auth_tripped = self.breaker.is_tripped();
        self.stats.consecutive_auth_failures = self.breaker.consecutive_failures();
        self.stats_tx.send_replace(self.stats.clone());
    }
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
