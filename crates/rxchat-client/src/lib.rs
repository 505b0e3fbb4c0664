//! Chat synchronization client.
//!
//! Keeps an in-memory conversation state consistent across an unreliable push
//! channel while the user issues optimistic writes.
//!
//! # Architecture
//!
//! The client follows the same sans-IO, action-based pattern as
//! [`rxchat_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute.
//!
//! # Components
//!
//! - [`ChatClient`]: top-level state machine
//! - [`ConversationStore`]: threads, messages, connection, typing, presence
//! - [`MessageReconciler`]: merges confirmed messages with optimistic ones
//! - [`TypingPresenceTracker`]: self-expiring typing flags and presence
//! - [`RoomSubscriptionManager`]: per-room topics and join/leave signals

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod error;
mod event;
pub mod reconcile;
pub mod store;
pub mod subscriptions;
pub mod typing;

pub use client::{ChatClient, ClientConfig, DEFAULT_TYPING_KEEPALIVE};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use reconcile::{DEFAULT_MATCH_WINDOW, InboundOutcome, MessageReconciler};
pub use rxchat_core::{ConnectionState, Credentials, Environment};
pub use store::{
    ConversationStore, ConversationThread, Message, MessageId, MessageStatus, StoreSnapshot,
};
pub use subscriptions::{ChannelSet, RoomSubscriptionManager, RoutedFrame, SubscriptionHandle};
pub use typing::{DEFAULT_TYPING_EXPIRY, TypingPresenceTracker};
