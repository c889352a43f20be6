//! Resilient request scheduler.
//!
//! This module provides:
//! - **Priority queue**: lower numbers first, FIFO within a tier.
//! - **Pacing gate**: concurrency cap plus minimum spacing between dispatches.
//! - **Classifier**: decides whether a failure is throttling, an auth failure,
//!   or an ordinary error.
//! - **Backoff**: a throttled attempt pauses the whole scheduler for an
//!   exponentially growing window and re-queues the item with higher priority.
//! - **Auth circuit breaker**: three consecutive auth failures stop all
//!   dispatch until a success or an explicit recovery signal.
//! - **Scheduler**: the handle callers submit work through.
//!
//! # Architecture
//!
//! One dispatcher task owns all state:
//! 1. `submit` sends the item to the dispatcher over a channel
//! 2. The dispatcher checks breaker, backoff window and pacing gate
//! 3. Eligible items are spawned as their own tasks
//! 4. Attempts report back over a completion channel; failures are
//!    classified and either retried or returned to the caller
//!
//! # Example
//!
//! ```ignore
//! use pacer::scheduler::{EnqueueOptions, Failure, Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let body = scheduler
//!     .enqueue(|| async { Ok::<_, Failure>("hello") }, EnqueueOptions::new().with_priority(1))
//!     .await?;
//! ```

mod backoff;
mod breaker;
mod classify;
mod config;
mod core;
mod failure;
mod item;
mod pacing;
mod queue;

pub use backoff::{BackoffPolicy, BackoffState, RetryDecision};
pub use breaker::{AuthCircuitBreaker, AuthStatus};
pub use classify::{classify, is_network_retryable};
pub use config::{AUTH_FAILURE_THRESHOLD, CircuitOpenPolicy, DEFAULT_PRIORITY, SchedulerConfig};
pub use self::core::{EnqueueOptions, Scheduler, SchedulerStats, Submission};
pub use failure::{Failure, FailureClass, SchedulerError};
pub use item::ItemMeta;
pub use pacing::{Gate, PacingGate};
pub use queue::PriorityQueue;
