//! Client error types.

use rxchat_core::ConnectionError;
use rxchat_proto::{ProtocolError, ThreadId};
use thiserror::Error;

use crate::store::MessageStatus;

/// Errors returned by [`ChatClient::handle`](crate::ChatClient::handle) and the
/// store's fallible mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No message with this id in the thread.
    #[error("message {message_id} not found in thread {thread_id}")]
    MessageNotFound {
        /// Thread searched
        thread_id: ThreadId,
        /// Id that was looked up
        message_id: String,
    },

    /// Message exists but is in the wrong state for the operation.
    #[error("message {message_id} is {status:?}, expected {expected:?}")]
    UnexpectedStatus {
        /// Message id
        message_id: String,
        /// Actual status
        status: MessageStatus,
        /// Status the operation requires
        expected: MessageStatus,
    },

    /// Message has neither text nor attachments.
    #[error("message is empty")]
    EmptyMessage,

    /// Operation needs a signed-in user and none is known.
    #[error("no signed-in user; connect first")]
    NotSignedIn,

    /// Connection state machine rejected the event.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Outbound frame could not be built.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
