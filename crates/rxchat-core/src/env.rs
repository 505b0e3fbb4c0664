//! Environment abstraction for deterministic testing.
//!
//! Decouples chat logic from system resources (time, randomness). Production
//! code uses the real clocks and OS entropy; simulation uses tokio's paused
//! clock and a seeded RNG so every run replays identically.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Monotonic instant usable by the state machines.
///
/// Implemented for any type with instant arithmetic, which covers
/// `std::time::Instant` and `tokio::time::Instant`.
pub trait MonotonicInstant:
    Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

impl<T> MonotonicInstant for T where
    T: Copy + Ord + Send + Sync + Sub<Output = Duration> + Add<Duration, Output = Self>
{
}

/// Abstract environment providing time, randomness, and async primitives.
///
/// # Invariants
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `wall_clock()` advances at the same rate as `now()`
/// - Given the same seed, a simulated environment yields the same sequence of
///   random values
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, simulation uses
    /// `tokio::time::Instant` with a paused clock.
    type Instant: MonotonicInstant;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current calendar time.
    ///
    /// Stamped on optimistic messages so they can be compared against server
    /// timestamps during reconciliation.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// This is the only async method in the trait and is used by driver code
    /// only, never by the state machines.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
