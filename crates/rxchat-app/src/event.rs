//! Observer events.

use std::time::Duration;

use rxchat_client::{ClientAction, ConnectionState};
use rxchat_core::ConnectionError;
use rxchat_proto::ThreadId;

/// Notifications broadcast to every observer of a
/// [`ChatService`](crate::ChatService).
///
/// Each subscriber gets its own copy. Slow subscribers lag and skip events
/// rather than blocking the runtime; the snapshot channel always carries the
/// latest state.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Connection state changed.
    StateChanged {
        /// New state
        state: ConnectionState,
        /// Consecutive failed attempts
        attempt: u32,
    },
    /// A session was established.
    Connected {
        /// True if this follows an earlier session
        resumed: bool,
    },
    /// The connect sequence ended without a session.
    ConnectFailed(ConnectionError),
    /// A connection retry was scheduled.
    RetryScheduled {
        /// Consecutive failed attempts so far
        attempt: u32,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// An optimistic message was inserted.
    MessagePending {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id
        local_id: u64,
    },
    /// An optimistic message was confirmed by the server.
    MessageConfirmed {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id that was replaced
        local_id: u64,
        /// Server id
        server_id: String,
    },
    /// A new confirmed message arrived.
    MessageReceived {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Server id
        server_id: String,
    },
    /// A pending message was marked failed.
    MessageFailed {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id
        local_id: u64,
    },
}

impl ChatEvent {
    /// The observer-facing part of a client action. Transport actions have
    /// none.
    pub fn from_action(action: &ClientAction) -> Option<Self> {
        let event = match action {
            ClientAction::Send(_)
            | ClientAction::OpenTransport { .. }
            | ClientAction::CloseTransport => return None,
            ClientAction::RetryScheduled { attempt, delay } => {
                Self::RetryScheduled { attempt: *attempt, delay: *delay }
            },
            ClientAction::StateChanged { state, attempt } => {
                Self::StateChanged { state: *state, attempt: *attempt }
            },
            ClientAction::Connected { resumed } => Self::Connected { resumed: *resumed },
            ClientAction::ConnectFailed(error) => Self::ConnectFailed(error.clone()),
            ClientAction::MessagePending { thread_id, local_id } => {
                Self::MessagePending { thread_id: *thread_id, local_id: *local_id }
            },
            ClientAction::MessageConfirmed { thread_id, local_id, server_id } => {
                Self::MessageConfirmed {
                    thread_id: *thread_id,
                    local_id: *local_id,
                    server_id: server_id.clone(),
                }
            },
            ClientAction::MessageReceived { thread_id, server_id } => {
                Self::MessageReceived { thread_id: *thread_id, server_id: server_id.clone() }
            },
            ClientAction::MessageFailed { thread_id, local_id } => {
                Self::MessageFailed { thread_id: *thread_id, local_id: *local_id }
            },
        };
        Some(event)
    }
}
