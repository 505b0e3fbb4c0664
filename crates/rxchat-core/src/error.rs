//! Error types for the connection lifecycle.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the connection state machine.
///
/// Only `AuthRejected` (during the initial connect) and `RetriesExhausted` are
/// ever surfaced to the UI. Everything else feeds back into the reconnect
/// loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Server refused the credentials.
    #[error("authentication rejected: {message}")]
    AuthRejected {
        /// Reason given by the server
        message: String,
    },

    /// Initial connection attempts hit the ceiling.
    #[error("gave up after {attempts} connection attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        last_error: String,
    },

    /// Transport opened but authentication did not complete in time.
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Operation not valid in the current state.
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when the error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: String,
    },

    /// Underlying transport failed to open or closed unexpectedly.
    #[error("transport error: {0}")]
    Transport(String),

    /// Caller disconnected before the connection was established.
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Authentication failures and exhausted retries are terminal. A cancelled
    /// attempt was the caller's decision and is not retried either.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HandshakeTimeout { .. } | Self::Transport(_))
    }
}
