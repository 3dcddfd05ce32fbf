//! Per-(method, plugin) token-bucket rate limiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::{MethodPolicies, RateLimitPolicy};
use crate::error::HostError;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    level: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self { level: capacity, last_refill: now }
    }

    /// Refill up to `policy.burst` at `policy.rate_per_sec`, using fractional
    /// tokens over the real-time elapsed, then try to consume one.
    fn try_consume(&mut self, policy: &RateLimitPolicy, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.level = (self.level + elapsed * policy.rate_per_sec).min(policy.burst as f64);
        self.last_refill = now;

        if self.level >= 1.0 {
            self.level -= 1.0;
            true
        } else {
            false
        }
    }

    fn retry_after(&self, policy: &RateLimitPolicy) -> Duration {
        let deficit = (1.0 - self.level).max(0.0);
        let seconds = if policy.rate_per_sec > 0.0 { deficit / policy.rate_per_sec } else { f64::MAX };
        Duration::from_secs_f64(seconds)
    }
}

/// Enforces two independent token-bucket policies per method — a per-second
/// burst policy and a per-minute sustained policy — keyed by
/// `(method, plugin_id)`. A call is admitted only when both buckets have a
/// token available; consuming from one and not the other would let a
/// caller exceed either window, so both are checked before either is
/// committed. Policies themselves come from the static per-method table;
/// a method with no explicit entry falls back to the table's default
/// pair.
#[derive(Clone)]
pub struct RateLimiter {
    per_second: Arc<DashMap<(String, String), Mutex<Bucket>>>,
    per_minute: Arc<DashMap<(String, String), Mutex<Bucket>>>,
    policies: Arc<MethodPolicies>,
}

impl RateLimiter {
    pub fn new(policies: MethodPolicies) -> Self {
        Self {
            per_second: Arc::new(DashMap::new()),
            per_minute: Arc::new(DashMap::new()),
            policies: Arc::new(policies),
        }
    }

    /// Attempt to consume one token from both buckets for `(method, plugin_id)`.
    pub fn check(&self, method: &str, plugin_id: &str) -> Result<(), HostError> {
        self.check_at(method, plugin_id, Instant::now())
    }

    fn check_at(&self, method: &str, plugin_id: &str, now: Instant) -> Result<(), HostError> {
        let key = (method.to_string(), plugin_id.to_string());
        let policy = self.policies.for_method(method);

        let second_bucket = self
            .per_second
            .entry(key.clone())
            .or_insert_with(|| Mutex::new(Bucket::full(policy.per_second.burst as f64, now)));
        let minute_bucket = self
            .per_minute
            .entry(key)
            .or_insert_with(|| Mutex::new(Bucket::full(policy.per_minute.burst as f64, now)));

        let mut second = second_bucket.lock();
        let mut minute = minute_bucket.lock();

        // Peek both before committing either consume, so a caller who
        // would pass the per-second check but fail per-minute (or vice
        // versa) is rejected without silently burning a token it can
        // never use.
        let second_projected = second.level
            + now.saturating_duration_since(second.last_refill).as_secs_f64() * policy.per_second.rate_per_sec;
        let minute_projected = minute.level
            + now.saturating_duration_since(minute.last_refill).as_secs_f64() * policy.per_minute.rate_per_sec;
        let second_would_pass = second_projected >= 1.0;
        let minute_would_pass = minute_projected >= 1.0;

        if !second_would_pass || !minute_would_pass {
            let retry_ms = second.retry_after(&policy.per_second).max(minute.retry_after(&policy.per_minute));
            // still refill the clocks so a subsequent call sees accurate levels
            second.try_consume(&policy.per_second, now);
            minute.try_consume(&policy.per_minute, now);
            return Err(HostError::RateLimited { retry_after_ms: retry_ms.as_millis() as u64 });
        }

        second.try_consume(&policy.per_second, now);
        minute.try_consume(&policy.per_minute, now);
        Ok(())
    }

    /// Drop buckets that have not been touched recently, bounding memory
    /// for methods/plugins that are no longer active.
    pub fn gc(&self, inactive_for: Duration) {
        let now = Instant::now();
        self.per_second.retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_refill) < inactive_for);
        self.per_minute.retain(|_, bucket| now.saturating_duration_since(bucket.lock().last_refill) < inactive_for);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(burst: u32, rate: f64) -> RateLimitPolicy {
        RateLimitPolicy { burst, rate_per_sec: rate }
    }

    #[test]
    fn allows_calls_up_to_burst_then_limits() {
        let limiter = RateLimiter::new(MethodPolicies::uniform(policy(2, 1.0), policy(100, 10.0)));
        let now = Instant::now();

        assert!(limiter.check_at("httpGet", "demo-automation", now).is_ok());
        assert!(limiter.check_at("httpGet", "demo-automation", now).is_ok());
        assert!(matches!(
            limiter.check_at("httpGet", "demo-automation", now),
            Err(HostError::RateLimited { .. })
        ));
    }

    #[test]
    fn refills_tokens_over_time() {
        let limiter = RateLimiter::new(MethodPolicies::uniform(policy(1, 1.0), policy(100, 10.0)));
        let now = Instant::now();

        assert!(limiter.check_at("httpGet", "demo-automation", now).is_ok());
        assert!(limiter.check_at("httpGet", "demo-automation", now).is_err());

        let later = now + Duration::from_secs(1);
        assert!(limiter.check_at("httpGet", "demo-automation", later).is_ok());
    }

    #[test]
    fn per_minute_policy_limits_even_with_second_budget_left() {
        let limiter = RateLimiter::new(MethodPolicies::uniform(policy(100, 100.0), policy(1, 0.01)));
        let now = Instant::now();

        assert!(limiter.check_at("httpGet", "demo-automation", now).is_ok());
        assert!(matches!(
            limiter.check_at("httpGet", "demo-automation", now),
            Err(HostError::RateLimited { .. })
        ));
    }

    #[test]
    fn buckets_are_independent_per_method_and_plugin() {
        let limiter = RateLimiter::new(MethodPolicies::uniform(policy(1, 1.0), policy(100, 10.0)));
        let now = Instant::now();

        assert!(limiter.check_at("httpGet", "demo-automation", now).is_ok());
        assert!(limiter.check_at("httpPost", "demo-automation", now).is_ok());
        assert!(limiter.check_at("httpGet", "other-plugin", now).is_ok());
    }

    #[test]
    fn enable_plugin_allows_three_calls_then_limits_the_fourth() {
        // Four calls to enablePlugin in under one second: the first
        // three succeed and the fourth fails with a retry_after_ms in
        // (0, 1000].
        let limiter = RateLimiter::new(MethodPolicies::platform_defaults());
        let now = Instant::now();

        assert!(limiter.check_at("enablePlugin", "p", now).is_ok());
        assert!(limiter.check_at("enablePlugin", "p", now).is_ok());
        assert!(limiter.check_at("enablePlugin", "p", now).is_ok());
        match limiter.check_at("enablePlugin", "p", now) {
            Err(HostError::RateLimited { retry_after_ms }) => {
                assert!(retry_after_ms > 0 && retry_after_ms <= 1000);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }
}
