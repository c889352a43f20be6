//! HTTP consuming layer.
//!
//! Wraps `reqwest` with JSON verb helpers whose requests all go through a
//! [`crate::scheduler::Scheduler`]. Non-2xx responses become structured
//! [`crate::scheduler::Failure`]s the classifier understands.

mod client;
mod translate;

pub use client::ApiClient;
pub use translate::{decode_body, failure_from_response, failure_from_transport};
