//! Failure types for scheduled work.
//!
//! [`Failure`] is what a work item's `execute` future returns when an attempt
//! fails. [`SchedulerError`] is what the submitter finally observes once the
//! scheduler has given up on the item.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// How the scheduler treats a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Application error; returned to the caller as-is.
    Normal,
    /// Backend throttling; retried after a shared backoff window.
    RateLimited,
    /// Session invalid or expired; counts toward the auth breaker.
    AuthFailure,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureClass::Normal => "normal",
            FailureClass::RateLimited => "rate-limited",
            FailureClass::AuthFailure => "auth-failure",
        };
        write!(f, "{}", s)
    }
}

/// A failed attempt, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Failure {
    /// HTTP status code, if the failure came from a response
    pub status: Option<u16>,
    /// Machine-readable error code from the response body
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Classification set explicitly by the transport; wins over heuristics
    pub class: Option<FailureClass>,
    /// Transport-level failure (connection refused, reset); retryable
    pub network: bool,
    /// The response body was not the JSON the caller expected
    pub malformed_body: bool,
    /// Server-suggested wait before retrying
    pub retry_after: Option<Duration>,
}

impl Failure {
    /// A plain application failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    /// A failure derived from an HTTP response status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }

    /// A transport-level failure that is safe to retry.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            network: true,
            ..Default::default()
        }
    }

    /// Attach a machine-readable error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Set the classification explicitly.
    pub fn with_class(mut self, class: FailureClass) -> Self {
        self.class = Some(class);
        self
    }

    /// Mark the response body as malformed.
    pub fn with_malformed_body(mut self) -> Self {
        self.malformed_body = true;
        self
    }

    /// Attach a server-suggested retry delay.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "{} ({}): {}", status, code, self.message),
            (Some(status), None) => write!(f, "{}: {}", status, self.message),
            (None, Some(code)) => write!(f, "{}: {}", code, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for Failure {}

/// Terminal outcome reported to a submitter whose work did not succeed.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// The backend kept throttling until the retry budget ran out
    #[error("Rate limit retries exhausted after {attempts} attempts: {cause}")]
    RateLimitExhausted { attempts: u32, cause: Failure },

    /// The session is invalid; the user must re-authenticate
    #[error("Authentication failed after {attempts} attempts: {cause}")]
    AuthFailure { attempts: u32, cause: Failure },

    /// Any other failure, passed through unmodified
    #[error("Request failed after {attempts} attempts: {cause}")]
    Failed { attempts: u32, cause: Failure },

    /// The auth breaker is tripped and new work is refused
    #[error("Authentication circuit is open, request refused")]
    CircuitOpen,

    /// The submitter cancelled the item before it was dispatched
    #[error("Request cancelled before dispatch")]
    Cancelled,

    /// The item was dropped unsettled: the scheduler stopped, or the work panicked
    #[error("Scheduler shut down")]
    Shutdown,
}

impl SchedulerError {
    /// Classification of the final failed attempt, if there was one.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            SchedulerError::RateLimitExhausted { .. } => Some(FailureClass::RateLimited),
            SchedulerError::AuthFailure { .. } | SchedulerError::CircuitOpen => Some(FailureClass::AuthFailure),
            SchedulerError::Failed { .. } => Some(FailureClass::Normal),
            SchedulerError::Cancelled | SchedulerError::Shutdown => None,
        }
    }

    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            SchedulerError::RateLimitExhausted { attempts, .. }
            | SchedulerError::AuthFailure { attempts, .. }
            | SchedulerError::Failed { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// The failure from the final attempt.
    pub fn cause(&self) -> Option<&Failure> {
        match self {
            SchedulerError::RateLimitExhausted { cause, .. }
            | SchedulerError::AuthFailure { cause, .. }
            | SchedulerError::Failed { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Whether the user has to log in again before anything will work.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, SchedulerError::AuthFailure { .. } | SchedulerError::CircuitOpen)
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> String {
        match self {
            SchedulerError::RateLimitExhausted { .. } => {
                "Service temporarily unavailable, please retry in a moment.".to_string()
            }
            SchedulerError::AuthFailure { .. } | SchedulerError::CircuitOpen => {
                "Your session has expired, please sign in again.".to_string()
            }
            SchedulerError::Failed { cause, .. } => cause.message.clone(),
            SchedulerError::Cancelled => "Request cancelled.".to_string(),
            SchedulerError::Shutdown => "Service is shutting down.".to_string(),
        }
    }
}
