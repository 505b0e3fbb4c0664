//! Simulated environment for deterministic testing.
//!
//! Monotonic time is tokio's clock, so `#[tokio::test(start_paused = true)]`
//! makes every sleep and timeout instant and reproducible. Wall-clock time is
//! a fixed origin plus elapsed virtual time. Randomness comes from a seeded
//! `ChaCha8` stream shared by all clones.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, TimeZone, Utc};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rxchat_core::Environment;
use tokio::time::Instant;

/// Seed used by [`SimEnv::new`].
pub const DEFAULT_SEED: u64 = 0x5eed;

/// Deterministic environment.
///
/// Clones share the clock origin and the RNG stream, so a client and a
/// simulated broker built from the same `SimEnv` agree on timestamps.
#[derive(Clone)]
pub struct SimEnv {
    origin: Instant,
    wall_origin: DateTime<Utc>,
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("wall_origin", &self.wall_origin).finish_non_exhaustive()
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Environment with [`DEFAULT_SEED`].
    pub fn new() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: Utc.timestamp_opt(1_735_689_600, 0).single().unwrap_or_default(),
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
        }
    }

    /// Virtual time since creation.
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        // Elapsed virtual time never approaches chrono's range limit
        self.wall_origin + chrono::Duration::from_std(self.elapsed()).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
