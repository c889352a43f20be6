//! Pacer - a resilient client-side request scheduler
//!
//! Pacer sits in front of an HTTP backend and mediates every call: it bounds
//! concurrency, spaces requests out, backs off globally when the backend
//! throttles, and stops dispatching altogether once the session is rejected
//! repeatedly.

pub mod config;
pub mod error;
pub mod http;
pub mod id;
pub mod scheduler;

pub use error::{PacerError, Result};
pub use http::ApiClient;
pub use scheduler::{EnqueueOptions, Failure, FailureClass, Scheduler, SchedulerConfig, SchedulerError, SchedulerStats};
