//! Work items: one scheduled operation plus its retry and priority metadata.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use super::failure::{Failure, SchedulerError};

/// Result of running one attempt of a job.
pub(crate) enum Attempt {
    /// The caller has been handed the value.
    Succeeded,
    /// The attempt failed; the job comes back for retry or rejection.
    Failed { job: Box<dyn Job>, failure: Failure },
}

/// Type-erased unit of work. Owns the submitter's reply channel, so settling
/// happens exactly once: either `run` succeeds or `reject` is called.
pub(crate) trait Job: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, Attempt>;

    fn reject(self: Box<Self>, error: SchedulerError);

    /// The submitter dropped its handle and no longer wants the result.
    fn is_abandoned(&self) -> bool;
}

pub(crate) struct Task<T, F> {
    execute: F,
    reply: oneshot::Sender<Result<T, SchedulerError>>,
}

impl<T, F> Task<T, F> {
    pub(crate) fn new(execute: F, reply: oneshot::Sender<Result<T, SchedulerError>>) -> Self {
        Self { execute, reply }
    }
}

impl<T, F, Fut> Job for Task<T, F>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Failure>> + Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, Attempt> {
        let task = *self;
        Box::pin(async move {
            // Built inside the future so a panicking thunk unwinds in its own task
            let attempt = (task.execute)();
            match attempt.await {
                Ok(value) => {
                    let _ = task.reply.send(Ok(value));
                    Attempt::Succeeded
                }
                Err(failure) => Attempt::Failed {
                    job: Box::new(task),
                    failure,
                },
            }
        })
    }

    fn reject(self: Box<Self>, error: SchedulerError) {
        let _ = self.reply.send(Err(error));
    }

    fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }
}

/// Bookkeeping that travels with a job through queue, dispatch and retry.
#[derive(Debug, Clone)]
pub struct ItemMeta {
    pub id: String,
    pub priority: u32,
    pub max_retries: u32,
    pub retries_remaining: u32,
    /// Longest backoff this item has been given so far
    pub last_backoff: Duration,
    pub cancelled: Arc<AtomicBool>,
}

impl ItemMeta {
    pub fn new(id: impl Into<String>, priority: u32, max_retries: u32) -> Self {
        Self {
            id: id.into(),
            priority,
            max_retries,
            retries_remaining: max_retries,
            last_backoff: Duration::ZERO,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attempts made so far, counting the one in progress.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_sub(self.retries_remaining) + 1
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub(crate) struct WorkItem {
    pub meta: ItemMeta,
    pub job: Box<dyn Job>,
}

impl WorkItem {
    /// Skip rather than dispatch: cancelled explicitly or nobody is listening.
    pub fn should_skip(&self) -> bool {
        self.meta.is_cancelled() || self.job.is_abandoned()
    }
}
