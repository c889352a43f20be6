//! Auth circuit breaker.
//!
//! Counts consecutive authentication failures. Once the threshold is reached
//! the breaker trips and the scheduler stops dispatching until a successful
//! call or an explicit recovery signal. Unlike throttling, an expired session
//! does not heal with time, so there is no timed half-open state.

use tokio::sync::watch;

use super::failure::FailureClass;

/// Breaker state as published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthStatus {
    pub tripped: bool,
    pub consecutive_failures: u32,
}

pub struct AuthCircuitBreaker {
    threshold: u32,
    consecutive_failures: u32,
    tripped: bool,
    status_tx: watch::Sender<AuthStatus>,
}

impl AuthCircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::default());
        Self {
            threshold,
            consecutive_failures: 0,
            tripped: false,
            status_tx,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn status(&self) -> AuthStatus {
        AuthStatus {
            tripped: self.tripped,
            consecutive_failures: self.consecutive_failures,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.status_tx.subscribe()
    }

    /// Record a classified failure. Only auth failures move the counter.
    pub fn record_outcome(&mut self, class: FailureClass) {
        if class != FailureClass::AuthFailure {
            return;
        }

        self.consecutive_failures += 1;
        if !self.tripped && self.consecutive_failures >= self.threshold {
            self.tripped = true;
            tracing::error!(
                consecutive_failures = self.consecutive_failures,
                "Auth circuit breaker tripped, suspending dispatch until re-authentication"
            );
        } else {
            tracing::warn!(consecutive_failures = self.consecutive_failures, "Auth failure recorded");
        }
        self.publish();
    }

    /// Record a successful call: resets the counter and untrips.
    pub fn record_success(&mut self) {
        if self.consecutive_failures == 0 && !self.tripped {
            return;
        }
        self.reset("success");
    }

    /// External recovery signal (e.g. a fresh login), regardless of the counter.
    pub fn recover(&mut self) {
        self.reset("recovery signal");
    }

    fn reset(&mut self, reason: &str) {
        let was_tripped = self.tripped;
        self.consecutive_failures = 0;
        self.tripped = false;
        if was_tripped {
            tracing::info!(%reason, "Auth circuit breaker recovered");
        }
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}
