//! Service error types.

use rxchat_client::ClientError;
use rxchat_core::ConnectionError;
use thiserror::Error;

/// Errors returned by [`ChatService`](crate::ChatService).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The client rejected the request.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The connect sequence ended without a session.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The runtime task is gone (disposed or crashed).
    #[error("chat service has stopped")]
    Stopped,
}

impl ServiceError {
    /// Whether retrying the same request later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(error) => error.is_transient(),
            Self::Client(ClientError::Connection(error)) => error.is_transient(),
            Self::Client(_) | Self::Stopped => false,
        }
    }
}
