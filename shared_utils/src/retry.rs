//! Backoff primitives shared by the retrieval and bulk-load layers.
//!
//! [`RetryPolicy`] is the capped, jittered exponential backoff used for
//! generic transient failures. [`RateLimitSchedule`] is the deliberately
//! slower linear schedule applied after an upstream signals throttling:
//! hammering a rate limiter with sub-second retries only extends the
//! penalty window.

use std::time::Duration;

use rand::Rng;

/// Capped exponential backoff with uniform jitter.
///
/// `delay(n)` is `min(base * 2^n, cap)` stretched by a random factor in
/// `[1, 1 + jitter]`, so the result never exceeds `cap * (1 + jitter)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy with the given base and cap, keeping the default 10% jitter.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.1,
        }
    }

    /// Overrides the jitter fraction (0.0 disables jitter entirely).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.max(0.0);
        self
    }

    /// Delay before retry number `attempt` (0-based), using the thread RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &mut rand::thread_rng())
    }

    /// Deterministic variant given a caller-supplied randomness source.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        // Exponent clamped so the f64 power never overflows into NaN land;
        // anything past 2^64 is far above any sane cap anyway.
        let exp = attempt.min(64) as i32;
        let capped = (self.base.as_secs_f64() * 2f64.powi(exp)).min(self.cap.as_secs_f64());
        let jitter = rng.gen_range(0.0..=self.jitter);
        Duration::from_secs_f64(capped * (1.0 + jitter))
    }

    /// Upper bound on any delay this policy can produce.
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.cap.as_secs_f64() * (1.0 + self.jitter))
    }
}

/// Linear backoff for rate-limit responses: `initial + step * attempt`.
///
/// Defaults to 60s, 90s, 120s, and so on; rate limits are costlier to retry
/// aggressively than generic transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSchedule {
    initial: Duration,
    step: Duration,
}

impl Default for RateLimitSchedule {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(60),
            step: Duration::from_secs(30),
        }
    }
}

impl RateLimitSchedule {
    /// A schedule starting at `initial` and growing by `step` per attempt.
    pub fn new(initial: Duration, step: Duration) -> Self {
        Self { initial, step }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.initial + self.step * attempt
    }
}
