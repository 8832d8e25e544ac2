//! Per-provider token-bucket rate limiting.
//!
//! One independent bucket per upstream provider. Tokens refill continuously
//! and lazily: refill is computed from elapsed time on every access, never by
//! a background timer. `check` answers "could I?" without spending anything;
//! only `consume` debits the bucket, so decision paths never burn budget the
//! call path needs.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

/// Call budget for one provider.
#[derive(Debug, Clone)]
pub struct RateBudget {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl RateBudget {
    /// A full bucket. `capacity` and `refill_per_sec` must be positive.
    #[must_use]
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    /// Credit tokens for the time elapsed since the last refill.
    /// Never exceeds capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn check(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        self.tokens >= n
    }

    fn consume(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    fn remaining(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }
}

/// Default bucket for providers missing from configuration: 100 calls/day.
///
/// A misconfigured provider degrades gracefully instead of blocking all of
/// its traffic.
const DEFAULT_CAPACITY: f64 = 100.0;
const DEFAULT_REFILL_PER_SEC: f64 = DEFAULT_CAPACITY / 86_400.0;

/// Thread-safe registry of per-provider token buckets.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBudget>>,
}

impl RateLimiter {
    /// Build from static provider configuration `(name, capacity, refill/s)`.
    #[must_use]
    pub fn new<I>(providers: I) -> Self
    where
        I: IntoIterator<Item = (String, f64, f64)>,
    {
        let buckets = providers
            .into_iter()
            .map(|(name, capacity, refill)| (name, RateBudget::new(capacity, refill)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    /// Non-mutating: true iff `n` tokens are available after lazy refill.
    #[must_use]
    pub fn check(&self, provider: &str, n: f64) -> bool {
        self.check_at(provider, n, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock, for deterministic tests
    /// and simulations.
    #[must_use]
    pub fn check_at(&self, provider: &str, n: f64, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        Self::bucket(&mut buckets, provider).check(n, now)
    }

    /// Mutating: debit `n` tokens if available. All-or-nothing; returns false
    /// and deducts nothing when the budget is short.
    pub fn consume(&self, provider: &str, n: f64) -> bool {
        self.consume_at(provider, n, Instant::now())
    }

    /// [`consume`](Self::consume) with an explicit clock.
    pub fn consume_at(&self, provider: &str, n: f64, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();
        let granted = Self::bucket(&mut buckets, provider).consume(n, now);
        if !granted {
            debug!(provider, requested = n, "rate budget exhausted");
        }
        granted
    }

    /// Current token count for observability.
    #[must_use]
    pub fn remaining(&self, provider: &str) -> f64 {
        let mut buckets = self.buckets.lock();
        Self::bucket(&mut buckets, provider).remaining(Instant::now())
    }

    /// Remaining tokens for every known provider, for the stats snapshot.
    #[must_use]
    pub fn remaining_all(&self) -> Vec<(String, f64)> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        buckets
            .iter_mut()
            .map(|(name, bucket)| (name.clone(), bucket.remaining(now)))
            .collect()
    }

    fn bucket<'a>(
        buckets: &'a mut HashMap<String, RateBudget>,
        provider: &str,
    ) -> &'a mut RateBudget {
        buckets.entry(provider.to_string()).or_insert_with(|| {
            debug!(provider, "provider not configured, using default bucket");
            RateBudget::new(DEFAULT_CAPACITY, DEFAULT_REFILL_PER_SEC)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn limiter(capacity: f64, refill: f64) -> RateLimiter {
        RateLimiter::new([("oddsapi".to_string(), capacity, refill)])
    }

    #[test]
    fn check_does_not_spend_tokens() {
        let limiter = limiter(2.0, 0.0);
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.check_at("oddsapi", 1.0, now));
        }
        assert!(limiter.consume_at("oddsapi", 1.0, now));
        assert!(limiter.consume_at("oddsapi", 1.0, now));
        assert!(!limiter.consume_at("oddsapi", 1.0, now));
    }

    #[test]
    fn consume_is_all_or_nothing() {
        let limiter = limiter(3.0, 0.0);
        let now = Instant::now();

        assert!(!limiter.consume_at("oddsapi", 5.0, now));
        // The failed consume deducted nothing.
        assert!(limiter.consume_at("oddsapi", 3.0, now));
    }

    #[test]
    fn tokens_refill_continuously_and_cap_at_capacity() {
        let limiter = limiter(10.0, 1.0);
        let start = Instant::now();

        for _ in 0..10 {
            assert!(limiter.consume_at("oddsapi", 1.0, start));
        }
        assert!(!limiter.consume_at("oddsapi", 1.0, start));

        // One second later one token is back.
        let later = start + Duration::from_secs(1);
        assert!(limiter.consume_at("oddsapi", 1.0, later));
        assert!(!limiter.consume_at("oddsapi", 1.0, later));

        // A long idle period refills to capacity, not beyond.
        let much_later = start + Duration::from_secs(3_600);
        assert!(limiter.check_at("oddsapi", 10.0, much_later));
        assert!(!limiter.check_at("oddsapi", 10.1, much_later));
    }

    #[test]
    fn unknown_provider_gets_default_bucket() {
        let limiter = limiter(10.0, 1.0);
        let now = Instant::now();

        // Not configured, but never fails closed.
        assert!(limiter.check_at("mystery-feed", 1.0, now));
        assert!(limiter.consume_at("mystery-feed", 1.0, now));
        // remaining() uses the real clock, so allow for a sliver of refill.
        let remaining = limiter.remaining("mystery-feed");
        assert!(remaining <= 99.1);
    }

    #[test]
    fn remaining_all_reports_every_touched_provider() {
        let limiter = limiter(10.0, 1.0);
        let now = Instant::now();
        assert!(limiter.consume_at("oddsapi", 4.0, now));

        let all = limiter.remaining_all();
        let odds = all.iter().find(|(name, _)| name == "oddsapi").unwrap();
        assert!(odds.1 <= 6.1);
    }
}
