//! Client events and actions.

use std::time::Duration;

use rxchat_core::{ConnectionError, ConnectionState, Credentials};
use rxchat_proto::{ClientFrame, ServerFrame, ThreadId};
use serde_json::{Map, Value};

use crate::store::ConversationThread;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting transport outcomes (open, open failure, close)
/// - Receiving frames from the network
/// - Driving time forward via ticks
/// - Forwarding user intents (send, typing, focus changes)
///
/// Generic over `I` (Instant type) to support both production
/// (`std::time::Instant`) and simulation (`tokio::time::Instant`).
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Start the initial connect sequence.
    Connect {
        /// Token, user and role to authenticate with
        credentials: Credentials,
    },

    /// Leave live rooms, close the transport, cancel pending retries.
    Disconnect,

    /// The transport requested by [`ClientAction::OpenTransport`] is open.
    TransportOpened,

    /// The transport requested by [`ClientAction::OpenTransport`] could not
    /// be opened.
    TransportOpenFailed {
        /// Human-readable reason
        reason: String,
    },

    /// The open transport closed without being asked to.
    TransportClosed {
        /// Human-readable reason
        reason: String,
    },

    /// Frame received from the server.
    FrameReceived(ServerFrame),

    /// Time tick for retries and expiry.
    ///
    /// The caller should tick no later than
    /// [`ChatClient::next_deadline`](crate::ChatClient::next_deadline).
    Tick {
        /// Current time from the environment
        now: I,
    },

    /// User sends a message.
    SendMessage {
        /// Target thread
        thread_id: ThreadId,
        /// Message text
        content: String,
        /// Attachment references
        metadata: Map<String, Value>,
    },

    /// User started or stopped typing.
    SetTyping {
        /// Thread being typed in
        thread_id: ThreadId,
        /// Whether the user is typing
        is_typing: bool,
    },

    /// User focused a thread, or none.
    SetActiveThread(Option<ThreadId>),

    /// Merge one thread from the listing API.
    UpsertThread(ConversationThread),

    /// Replace the thread list from the listing API.
    LoadThreads(Vec<ConversationThread>),

    /// Merge a page of raw history entries from the history API.
    LoadHistory {
        /// Thread the page belongs to
        thread_id: ThreadId,
        /// Raw message bodies
        page: Vec<Value>,
    },

    /// Caller's own delivery timeout fired for a pending message.
    MarkFailed {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id of the pending message
        local_id: u64,
    },

    /// Resubmit a failed message under a fresh local id.
    RetryMessage {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id of the failed message
        local_id: u64,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Write this frame to the transport.
    Send(ClientFrame),

    /// Open a fresh transport and report back with
    /// [`ClientEvent::TransportOpened`] or
    /// [`ClientEvent::TransportOpenFailed`].
    OpenTransport {
        /// 1-based attempt number within the current retry run
        attempt: u32,
    },

    /// Close the current transport.
    CloseTransport,

    /// A connection retry was scheduled.
    RetryScheduled {
        /// Consecutive failed attempts so far
        attempt: u32,
        /// Delay before the next attempt
        delay: Duration,
    },

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

    /// An optimistic message was inserted.
    MessagePending {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id assigned
        local_id: u64,
    },

    /// An optimistic message was replaced by its confirmed echo.
    MessageConfirmed {
        /// Thread the message belongs to
        thread_id: ThreadId,
        /// Local id that was replaced
        local_id: u64,
        /// Server id that replaced it
        server_id: String,
    },

    /// A confirmed message from someone else (or another device) arrived.
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
        /// Local id of the failed message
        local_id: u64,
    },
}
