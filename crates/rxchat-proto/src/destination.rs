//! Topic and destination addressing.
//!
//! The server broadcasts on per-room topics:
//!
//! ```text
//! /topic/chat/room/{id}            confirmed messages
//! /topic/chat/room/{id}/typing     typing signals
//! /topic/chat/room/{id}/presence   join/leave broadcasts
//! ```
//!
//! Clients publish to application destinations:
//!
//! ```text
//! /app/chat.room.{id}     send a message
//! /app/chat.typing.{id}   typing signal
//! /app/chat.join.{id}     join announcement
//! /app/chat.leave.{id}    leave announcement
//! ```
//!
//! Both are carried on the wire as plain strings, so they serialize through
//! their `Display`/`FromStr` forms.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ThreadId};

const TOPIC_PREFIX: &str = "/topic/chat/room/";
const DESTINATION_PREFIX: &str = "/app/chat.";

/// Kind of per-room channel a topic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    /// Confirmed chat messages
    Messages,
    /// Typing indicators
    Typing,
    /// Join/leave presence broadcasts
    Presence,
}

/// Server-to-client broadcast topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic {
    /// Room the topic belongs to
    pub thread_id: ThreadId,
    /// Channel within the room
    pub channel: Channel,
}

impl Topic {
    /// Message topic for a room.
    pub fn messages(thread_id: ThreadId) -> Self {
        Self { thread_id, channel: Channel::Messages }
    }

    /// Typing topic for a room.
    pub fn typing(thread_id: ThreadId) -> Self {
        Self { thread_id, channel: Channel::Typing }
    }

    /// Presence topic for a room.
    pub fn presence(thread_id: ThreadId) -> Self {
        Self { thread_id, channel: Channel::Presence }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel {
            Channel::Messages => write!(f, "{TOPIC_PREFIX}{}", self.thread_id),
            Channel::Typing => write!(f, "{TOPIC_PREFIX}{}/typing", self.thread_id),
            Channel::Presence => write!(f, "{TOPIC_PREFIX}{}/presence", self.thread_id),
        }
    }
}

impl FromStr for Topic {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ProtocolError::UnknownTopic(s.to_string());

        let rest = s.strip_prefix(TOPIC_PREFIX).ok_or_else(unknown)?;
        let (id, channel) = match rest.split_once('/') {
            None => (rest, Channel::Messages),
            Some((id, "typing")) => (id, Channel::Typing),
            Some((id, "presence")) => (id, Channel::Presence),
            Some(_) => return Err(unknown()),
        };

        let thread_id = id.parse().map_err(|_| unknown())?;
        Ok(Self { thread_id, channel })
    }
}

impl TryFrom<String> for Topic {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

/// Client-to-server publish destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Destination {
    /// Submit a chat message to a room
    Send(ThreadId),
    /// Typing signal for a room
    Typing(ThreadId),
    /// Announce that we joined a room
    Join(ThreadId),
    /// Announce that we left a room
    Leave(ThreadId),
}

impl Destination {
    /// Room this destination addresses.
    pub fn thread_id(&self) -> ThreadId {
        match *self {
            Self::Send(id) | Self::Typing(id) | Self::Join(id) | Self::Leave(id) => id,
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Self::Send(_) => "room",
            Self::Typing(_) => "typing",
            Self::Join(_) => "join",
            Self::Leave(_) => "leave",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DESTINATION_PREFIX}{}.{}", self.verb(), self.thread_id())
    }
}

impl FromStr for Destination {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ProtocolError::UnknownDestination(s.to_string());

        let rest = s.strip_prefix(DESTINATION_PREFIX).ok_or_else(unknown)?;
        let (verb, id) = rest.split_once('.').ok_or_else(unknown)?;
        let id: ThreadId = id.parse().map_err(|_| unknown())?;

        match verb {
            "room" => Ok(Self::Send(id)),
            "typing" => Ok(Self::Typing(id)),
            "join" => Ok(Self::Join(id)),
            "leave" => Ok(Self::Leave(id)),
            _ => Err(unknown()),
        }
    }
}

impl TryFrom<String> for Destination {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        destination.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_paths() {
        assert_eq!(Topic::messages(7).to_string(), "/topic/chat/room/7");
        assert_eq!(Topic::typing(7).to_string(), "/topic/chat/room/7/typing");
        assert_eq!(Topic::presence(7).to_string(), "/topic/chat/room/7/presence");
    }

    #[test]
    fn parse_topic() {
        assert_eq!("/topic/chat/room/42".parse::<Topic>().unwrap(), Topic::messages(42));
        assert_eq!("/topic/chat/room/42/typing".parse::<Topic>().unwrap(), Topic::typing(42));
        assert_eq!(
            "/topic/chat/room/42/presence".parse::<Topic>().unwrap(),
            Topic::presence(42)
        );
    }

    #[test]
    fn reject_unknown_topics() {
        for bad in ["/topic/chat/room/", "/topic/chat/room/x", "/topic/chat/room/1/reads", "/q/1"]
        {
            assert!(matches!(bad.parse::<Topic>(), Err(ProtocolError::UnknownTopic(_))), "{bad}");
        }
    }

    #[test]
    fn destination_paths() {
        assert_eq!(Destination::Send(3).to_string(), "/app/chat.room.3");
        assert_eq!(Destination::Typing(3).to_string(), "/app/chat.typing.3");
        assert_eq!(Destination::Join(3).to_string(), "/app/chat.join.3");
        assert_eq!(Destination::Leave(3).to_string(), "/app/chat.leave.3");
    }

    #[test]
    fn reject_unknown_destinations() {
        for bad in ["/app/chat.room", "/app/chat.read.1", "/app/chat.room.one", "chat.room.1"] {
            assert!(
                matches!(bad.parse::<Destination>(), Err(ProtocolError::UnknownDestination(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn topic_serializes_as_string() {
        let json = serde_json::to_string(&Topic::typing(9)).unwrap();
        assert_eq!(json, "\"/topic/chat/room/9/typing\"");

        let back: Topic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Topic::typing(9));
    }
}
