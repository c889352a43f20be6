//! Backoff controller for coordinated throttling.
//!
//! When the backend throttles one request, every queued request must wait:
//! the limited resource is the backend, not the item. The window grows with
//! the number of retries the throttled item has already used.

use tokio::time::{Duration, Instant};

use super::item::ItemMeta;

/// What to do with an item after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue at the front of this (boosted) priority tier.
    Retry { priority: u32 },
    /// Budget spent; reject the caller.
    Exhausted,
}

/// Exponential backoff window, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// `min(base * 2^(max_retries - retries_remaining), cap)`, raised to the
    /// server's retry hint when it asks for longer (still capped).
    pub fn delay(&self, max_retries: u32, retries_remaining: u32, retry_after: Option<Duration>) -> Duration {
        let used = max_retries.saturating_sub(retries_remaining);
        let factor = 2u32.checked_pow(used).unwrap_or(u32::MAX);
        let exp = self.base.saturating_mul(factor);
        let wanted = retry_after.map_or(exp, |hint| exp.max(hint));
        wanted.min(self.cap)
    }
}

/// Global throttle state shared by every item in one scheduler.
#[derive(Debug)]
pub struct BackoffState {
    policy: BackoffPolicy,
    /// Dispatch is suspended until this instant (None = not throttled).
    throttled_until: Option<Instant>,
    /// Throttled attempts since the last success.
    consecutive_hits: u32,
    /// Last successful dispatch completion.
    last_success: Option<Instant>,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            throttled_until: None,
            consecutive_hits: 0,
            last_success: None,
        }
    }

    /// Remaining backoff, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.throttled_until
            .and_then(|until| if now < until { Some(until - now) } else { None })
    }

    /// End of the active throttle window, if one is still running.
    pub fn throttled_until(&self, now: Instant) -> Option<Instant> {
        self.throttled_until.filter(|until| now < *until)
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.consecutive_hits
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Handle a throttled attempt of `meta`.
    ///
    /// Arms the shared window (never shortening one already running), spends
    /// one retry and, if budget remains, promotes the item one priority step.
    /// An item's delay never drops below the one it was last given, so a large
    /// `Retry-After` hint carries over to later attempts.
    pub fn on_rate_limited(&mut self, meta: &mut ItemMeta, retry_after: Option<Duration>, now: Instant) -> RetryDecision {
        let delay = self
            .policy
            .delay(meta.max_retries, meta.retries_remaining, retry_after)
            .max(meta.last_backoff);
        meta.last_backoff = delay;
        let until = now + delay;
        self.throttled_until = Some(match self.throttled_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        self.consecutive_hits += 1;

        tracing::warn!(
            item_id = %meta.id,
            backoff_ms = delay.as_millis() as u64,
            consecutive_hits = self.consecutive_hits,
            retries_remaining = meta.retries_remaining.saturating_sub(1),
            "Rate limited, backing off globally"
        );

        spend_retry(meta)
    }

    /// Record a successful attempt.
    pub fn record_success(&mut self, now: Instant) {
        self.consecutive_hits = 0;
        self.last_success = Some(now);
    }
}

/// Spend one retry without touching the shared window (transport failures).
pub fn spend_retry(meta: &mut ItemMeta) -> RetryDecision {
    meta.retries_remaining = meta.retries_remaining.saturating_sub(1);
    if meta.retries_remaining == 0 {
        return RetryDecision::Exhausted;
    }
    meta.priority = meta.priority.saturating_sub(1);
    RetryDecision::Retry {
        priority: meta.priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(1000), Duration::from_millis(10_000))
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let p = policy();
        assert_eq!(p.delay(5, 5, None), Duration::from_millis(1000));
        assert_eq!(p.delay(5, 4, None), Duration::from_millis(2000));
        assert_eq!(p.delay(5, 3, None), Duration::from_millis(4000));
        assert_eq!(p.delay(5, 2, None), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy();
        assert_eq!(p.delay(5, 1, None), Duration::from_millis(10_000));
        assert_eq!(p.delay(40, 0, None), Duration::from_millis(10_000));
    }

    #[test]
    fn test_delay_non_decreasing() {
        let p = policy();
        let delays: Vec<_> = (0..=10).rev().map(|left| p.delay(10, left, None)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_millis(10_000)));
    }

    #[test]
    fn test_retry_after_raises_but_stays_capped() {
        let p = policy();
        assert_eq!(p.delay(3, 3, Some(Duration::from_secs(4))), Duration::from_secs(4));
        assert_eq!(p.delay(3, 3, Some(Duration::from_millis(10))), Duration::from_millis(1000));
        assert_eq!(p.delay(3, 3, Some(Duration::from_secs(60))), Duration::from_millis(10_000));
    }

    #[test]
    fn test_on_rate_limited_arms_window_and_boosts() {
        let mut state = BackoffState::new(policy());
        let mut meta = ItemMeta::new("req-1", 5, 3);
        let now = Instant::now();

        let decision = state.on_rate_limited(&mut meta, None, now);

        assert_eq!(decision, RetryDecision::Retry { priority: 4 });
        assert_eq!(meta.retries_remaining, 2);
        assert_eq!(state.remaining(now), Some(Duration::from_millis(1000)));
        assert_eq!(state.consecutive_hits(), 1);
    }

    #[test]
    fn test_item_delay_never_drops_after_hint() {
        let mut state = BackoffState::new(policy());
        let mut meta = ItemMeta::new("req-1", 5, 4);
        let now = Instant::now();

        state.on_rate_limited(&mut meta, Some(Duration::from_secs(8)), now);
        assert_eq!(meta.last_backoff, Duration::from_secs(8));

        // Exponential step alone would be 2s here
        let later = now + Duration::from_secs(8);
        state.on_rate_limited(&mut meta, None, later);
        assert_eq!(meta.last_backoff, Duration::from_secs(8));
        assert_eq!(state.remaining(later), Some(Duration::from_secs(8)));

        // The 4s exponential step is still below the carried-over hint
        let latest = later + Duration::from_secs(8);
        state.on_rate_limited(&mut meta, None, latest);
        assert_eq!(meta.last_backoff, Duration::from_secs(8));
    }

    #[test]
    fn test_on_rate_limited_exhausts_budget() {
        let mut state = BackoffState::new(policy());
        let mut meta = ItemMeta::new("req-1", 5, 2);
        let now = Instant::now();

        assert_eq!(state.on_rate_limited(&mut meta, None, now), RetryDecision::Retry { priority: 4 });
        assert_eq!(state.on_rate_limited(&mut meta, None, now), RetryDecision::Exhausted);
        assert_eq!(meta.retries_remaining, 0);
    }

    #[test]
    fn test_window_never_shortened() {
        let mut state = BackoffState::new(policy());
        let now = Instant::now();

        let mut deep = ItemMeta::new("deep", 5, 5);
        deep.retries_remaining = 2; // 8s window
        state.on_rate_limited(&mut deep, None, now);

        let mut fresh = ItemMeta::new("fresh", 5, 5); // 1s window
        state.on_rate_limited(&mut fresh, None, now);

        assert_eq!(state.remaining(now), Some(Duration::from_millis(8000)));
    }

    #[test]
    fn test_window_expires() {
        let mut state = BackoffState::new(policy());
        let mut meta = ItemMeta::new("req-1", 5, 3);
        let now = Instant::now();
        state.on_rate_limited(&mut meta, None, now);

        let later = now + Duration::from_millis(1000);
        assert!(state.remaining(later).is_none());
        assert!(state.throttled_until(later).is_none());
    }

    #[test]
    fn test_record_success_resets_hits() {
        let mut state = BackoffState::new(policy());
        let mut meta = ItemMeta::new("req-1", 5, 3);
        let now = Instant::now();
        state.on_rate_limited(&mut meta, None, now);

        state.record_success(now);

        assert_eq!(state.consecutive_hits(), 0);
        assert_eq!(state.last_success(), Some(now));
    }

    #[test]
    fn test_spend_retry_priority_floor() {
        let mut meta = ItemMeta::new("req-1", 0, 3);
        assert_eq!(spend_retry(&mut meta), RetryDecision::Retry { priority: 0 });
    }
}
