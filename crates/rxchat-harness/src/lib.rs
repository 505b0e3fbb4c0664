//! Deterministic simulation harness for chat synchronization testing.
//!
//! Simulated implementations of the Environment and transport seams so that
//! full [`ChatService`](rxchat_app::ChatService) instances run against an
//! in-memory backend on tokio's paused clock. Reconnect backoff, handshake
//! timeouts and typing expiry all play out in virtual time, reproducibly.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold for every store
//! snapshot. Use [`InvariantRegistry::standard()`] for the common set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_broker;
pub mod sim_env;

pub use invariants::{
    ActiveThreadRead, Invariant, InvariantRegistry, InvariantResult, MessagesOrdered,
    StatusMatchesId, UniqueServerIds, Violation,
};
pub use sim_broker::SimBroker;
pub use sim_env::{DEFAULT_SEED, SimEnv};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber.
///
/// Filtered by `RUST_LOG`, written through the test harness's capture. Safe to
/// call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
