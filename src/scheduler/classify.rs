//! Failure classification.
//!
//! This is the one place the failure taxonomy is decided. Retry policy in the
//! dispatch loop depends on [`classify`] being pure and stable.

use super::failure::{Failure, FailureClass};

/// Message fragments that show up when a provider answers a throttled request
/// with an HTML error page instead of JSON.
const RATE_LIMIT_MARKERS: &[&str] = &[
    "Too Many",
    "Unexpected token",
    "is not valid JSON",
    "<!DOCTYPE",
    "<html",
];

/// Matched case-insensitively against the message and the error code.
const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "rate_limit"];

/// Decide how the scheduler should treat a failed attempt.
///
/// An explicit class set by the transport always wins. Otherwise 429 means
/// throttling and 401 means the session is gone. A malformed body, one of the
/// HTML-error-page markers, or "rate limit" wording in the message or code is
/// taken as throttling on a best-effort basis.
pub fn classify(failure: &Failure) -> FailureClass {
    if let Some(class) = failure.class {
        return class;
    }

    match failure.status {
        Some(429) => return FailureClass::RateLimited,
        Some(401) => return FailureClass::AuthFailure,
        _ => {}
    }

    if failure.malformed_body || RATE_LIMIT_MARKERS.iter().any(|m| failure.message.contains(m)) {
        return FailureClass::RateLimited;
    }

    if mentions_rate_limit(&failure.message) || failure.code.as_deref().is_some_and(mentions_rate_limit) {
        return FailureClass::RateLimited;
    }

    FailureClass::Normal
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Whether a `Normal` failure may still be retried (without global backoff).
pub fn is_network_retryable(failure: &Failure) -> bool {
    failure.network
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_429_is_rate_limited() {
        assert_eq!(classify(&Failure::http(429, "slow down")), FailureClass::RateLimited);
    }

    #[test]
    fn test_status_401_is_auth_failure() {
        assert_eq!(classify(&Failure::http(401, "unauthorized")), FailureClass::AuthFailure);
    }

    #[test]
    fn test_other_statuses_are_normal() {
        for status in [400, 403, 404, 409, 422, 500, 502, 503] {
            assert_eq!(classify(&Failure::http(status, "nope")), FailureClass::Normal, "status {status}");
        }
    }

    #[test]
    fn test_explicit_class_wins() {
        let f = Failure::http(429, "throttled").with_class(FailureClass::Normal);
        assert_eq!(classify(&f), FailureClass::Normal);

        let f = Failure::http(503, "busy").with_class(FailureClass::RateLimited);
        assert_eq!(classify(&f), FailureClass::RateLimited);
    }

    #[test]
    fn test_malformed_body_is_rate_limited() {
        let f = Failure::http(200, "could not decode body").with_malformed_body();
        assert_eq!(classify(&f), FailureClass::RateLimited);
    }

    #[test]
    fn test_html_markers_are_rate_limited() {
        assert_eq!(classify(&Failure::new("Too Many Requests")), FailureClass::RateLimited);
        assert_eq!(
            classify(&Failure::new("Unexpected token '<', \"<!DOCTYPE \"... is not valid JSON")),
            FailureClass::RateLimited
        );
        assert_eq!(classify(&Failure::new("<html><body>busy</body></html>")), FailureClass::RateLimited);
    }

    #[test]
    fn test_rate_limit_wording_is_rate_limited() {
        assert_eq!(classify(&Failure::http(503, "rate limit exceeded")), FailureClass::RateLimited);
        assert_eq!(classify(&Failure::http(503, "Rate limit exceeded")), FailureClass::RateLimited);
        assert_eq!(classify(&Failure::new("RATE_LIMIT")), FailureClass::RateLimited);
        assert_eq!(
            classify(&Failure::http(400, "slow down").with_code("rate_limit")),
            FailureClass::RateLimited
        );
        assert_eq!(classify(&Failure::http(400, "rated limited edition")), FailureClass::Normal);
    }

    #[test]
    fn test_status_takes_precedence_over_markers() {
        let f = Failure::http(401, "<html>login required</html>");
        assert_eq!(classify(&f), FailureClass::AuthFailure);
    }

    #[test]
    fn test_network_failure_is_normal_but_retryable() {
        let f = Failure::network("connection reset by peer");
        assert_eq!(classify(&f), FailureClass::Normal);
        assert!(is_network_retryable(&f));
        assert!(!is_network_retryable(&Failure::http(500, "oops")));
    }

    #[test]
    fn test_classify_is_stable() {
        let f = Failure::http(429, "slow down");
        assert_eq!(classify(&f), classify(&f));
    }
}
