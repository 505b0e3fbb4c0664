//! Production Environment implementation using system clocks and OS entropy.
//!
//! Production behavior is non-deterministic: real time advances on its own and
//! randomness comes from the operating system.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rxchat_core::Environment;

/// Production environment.
///
/// Uses `std::time::Instant::now()` for monotonic time, `Utc::now()` for
/// message timestamps, `tokio::time::sleep()` for delays, and getrandom for
/// jitter seeds.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. That indicates an OS-level fault
/// the process cannot recover from.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }
}
