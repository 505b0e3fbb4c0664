//! Wire protocol for the pharmacy chat push channel.
//!
//! Frames travel as JSON text over a message-framed transport. Every frame is
//! an object tagged by `"type"`; application traffic rides inside
//! [`ClientFrame::Publish`] and [`ServerFrame::Message`] addressed by a
//! [`Destination`] (client to server) or a [`Topic`] (server to client).
//!
//! Inbound message bodies are produced by several backend versions that do not
//! agree on field names. [`normalize_message`] resolves them into a single
//! [`NormalizedMessage`] shape before anything touches client state.
//!
//! # Invariants
//!
//! - Topic and destination strings round-trip through `Display`/`FromStr`.
//! - Normalization never panics: a body lacking an id, sender, or timestamp is
//!   rejected with a [`ProtocolError`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod destination;
pub mod errors;
pub mod frame;
pub mod normalize;
pub mod payloads;

pub use destination::{Channel, Destination, Topic};
pub use errors::{ProtocolError, Result};
pub use frame::{ClientFrame, Role, ServerFrame};
pub use normalize::{NormalizedMessage, normalize_message, parse_timestamp};
pub use payloads::{
    OutboundMessage, PresenceSignal, PresenceStatus, RoomSignal, TypingSignal,
};

/// Conversation (chat room) identifier assigned by the backend.
pub type ThreadId = u64;

/// User identifier assigned by the backend.
pub type UserId = u64;
