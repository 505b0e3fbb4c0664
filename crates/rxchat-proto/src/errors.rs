//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding, decoding, or normalizing wire data.
///
/// Every variant describes malformed input from the peer or a programming
/// error on our side. None of them are retryable: re-reading the same bytes
/// produces the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame text was not valid JSON or did not match any frame shape.
    #[error("malformed frame: {0}")]
    Json(String),

    /// A required field was absent under every accepted alias.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A field was present but could not be coerced to the expected type.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Canonical name of the field
        field: &'static str,
        /// What was wrong with the value
        reason: String,
    },

    /// Topic path is not one of the known chat topics.
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Destination path is not one of the known chat destinations.
    #[error("unknown destination: {0}")]
    UnknownDestination(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
