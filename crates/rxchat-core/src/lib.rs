//! Core building blocks for the pharmacy chat engine.
//!
//! Everything in this crate is sans-IO: state machines take the current time
//! as input and return actions for a driver to execute. The [`Environment`]
//! trait is the only seam to real clocks and entropy.
//!
//! # Components
//!
//! - [`Environment`]: monotonic clock, wall clock, randomness, sleep
//! - [`Backoff`]: capped exponential retry schedule
//! - [`ConnectionManager`]: connect, authenticate, and reconnect lifecycle

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod connection;
pub mod env;
pub mod error;

pub use backoff::Backoff;
pub use connection::{
    ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState, Credentials,
};
pub use env::{Environment, MonotonicInstant};
pub use error::ConnectionError;
