//! Capped exponential backoff.
//!
//! Attempt `n` (1-based) waits `base * 2^(n-1)`, capped at `max`. With the
//! defaults that is 1s, 2s, 4s, 8s, 16s, 30s, 30s, ...
//!
//! An optional jitter ratio spreads each delay uniformly over
//! `[delay * (1 - ratio), delay * (1 + ratio)]` so that many clients dropped by
//! the same outage do not reconnect in lockstep. The cap applies after jitter.

use std::time::Duration;

/// Delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Upper bound on any single retry delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Retry delay schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

impl Backoff {
    /// Schedule without jitter.
    pub fn new(base: Duration, max: Duration) -> Self {
        debug_assert!(base <= max, "backoff base {base:?} exceeds cap {max:?}");
        Self { base, max, jitter: 0.0 }
    }

    /// Spread each delay by up to `ratio` in either direction.
    ///
    /// The ratio is clamped to `[0, 1]`.
    #[must_use]
    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    /// Nominal delay before retry number `attempt`, counting from 1.
    ///
    /// Attempt 0 is treated as attempt 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }

    /// Delay with jitter applied, drawn from `sample`.
    ///
    /// `sample` should be uniformly random. Equal samples give equal delays.
    pub fn jittered(&self, attempt: u32, sample: u64) -> Duration {
        let nominal = self.delay(attempt);
        if self.jitter == 0.0 {
            return nominal;
        }

        let spread = nominal.mul_f64(self.jitter).as_millis() as u64;
        let window = spread.saturating_mul(2).saturating_add(1);
        let offset = Duration::from_millis(sample % window);
        let low = nominal.saturating_sub(Duration::from_millis(spread));

        (low + offset).min(self.max)
    }

    /// Upper bound on any delay.
    pub fn max(&self) -> Duration {
        self.max
    }
}
