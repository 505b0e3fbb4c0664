//! Publish and broadcast bodies.
//!
//! These ride in the `body` field of [`ClientFrame::Publish`] and
//! [`ServerFrame::Message`]. Chat message broadcasts are not listed here: their
//! shape varies between backend versions and goes through
//! [`normalize_message`](crate::normalize_message) instead.
//!
//! [`ClientFrame::Publish`]: crate::ClientFrame::Publish
//! [`ServerFrame::Message`]: crate::ServerFrame::Message

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{Role, ThreadId, UserId, normalize::coerce_id};

/// Body published to [`Destination::Send`](crate::Destination::Send).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Target room
    pub chat_room_id: ThreadId,
    /// Message text
    pub text: String,
    /// Author of the message
    pub sender_id: UserId,
    /// Role of the author
    pub sender_type: Role,
    /// Attachment references and other opaque data
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Typing indicator, both published and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Room the signal applies to. Broadcasts may omit it; the topic names the
    /// room.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<ThreadId>,
    /// Whether the user is typing
    pub is_typing: bool,
    /// User the signal is about
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: UserId,
    /// Display name, if the publisher supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

/// Presence transition carried on a presence topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// User joined the room (came online)
    #[serde(alias = "online", alias = "JOIN", alias = "ONLINE")]
    Join,
    /// User left the room (went offline)
    #[serde(alias = "offline", alias = "LEAVE", alias = "OFFLINE")]
    Leave,
}

/// Presence broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSignal {
    /// User whose presence changed
    #[serde(deserialize_with = "lenient_id")]
    pub user_id: UserId,
    /// New presence
    pub status: PresenceStatus,
}

/// Body of join and leave announcements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSignal {
    /// Room being joined or left
    pub chat_room_id: ThreadId,
}

/// Accepts ids as JSON numbers or numeric strings.
fn lenient_id<'de, D>(deserializer: D) -> Result<UserId, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    coerce_id(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id {value}")))
}
