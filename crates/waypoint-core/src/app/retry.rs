//! Retry policy: decides how many attempts and how long to wait between them.

use std::time::Duration;

use rand::Rng;

/// Retry policy shared by the object-storage fetch and the broker reconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub base_delay: Duration,

    /// Backoff multiplier. `1.0` gives a fixed delay.
    pub multiplier: f64,

    /// Upper bound of a single delay.
    pub max_delay: Duration,

    /// Add up to 25% random jitter on top of each delay.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Deep-scan documents: 5 attempts, fixed 5s gap.
    pub fn object_storage() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            multiplier: 1.0,
            max_delay: Duration::from_secs(5),
            jitter: false,
        }
    }

    /// Broker reconnect: 1s, 2s, 4s, ... capped at 30s, with jitter.
    pub fn reconnect(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Delay to wait after `attempts` failed attempts (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
    /// With base=1s, multiplier=2.0: 1s, 2s, 4s, 8s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = (base_secs * self.multiplier.powi(exponent)).min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(delay_secs);

        if self.jitter && !delay.is_zero() {
            let max_jitter_ms = (delay.as_millis() / 4) as u64;
            let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter_ms);
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempts` attempts.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
