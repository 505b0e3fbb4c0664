//! Frame envelopes.
//!
//! A frame is one JSON object per transport message, tagged by `"type"`.
//! Field names are camelCase on the wire.
//!
//! ```text
//! {"type":"auth","token":"...","userId":12,"role":"customer"}
//! {"type":"subscribe","topic":"/topic/chat/room/4"}
//! {"type":"publish","destination":"/app/chat.room.4","body":{...}}
//! {"type":"auth_success","sessionId":"a1"}
//! {"type":"message","topic":"/topic/chat/room/4","body":{...}}
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Destination, ProtocolError, Result, Topic, UserId};

/// Role tag announced during authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Patient using the storefront
    #[serde(alias = "CUSTOMER")]
    Customer,
    /// Pharmacist answering patient questions
    #[serde(alias = "PHARMACIST")]
    Pharmacist,
    /// Administrator of a single pharmacy
    #[serde(alias = "PHARMACY_ADMIN")]
    PharmacyAdmin,
    /// Platform administrator
    #[serde(alias = "ADMIN")]
    Admin,
}

impl Role {
    /// Wire tag for this role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Pharmacist => "pharmacist",
            Self::PharmacyAdmin => "pharmacy_admin",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    /// Case-insensitive; the backend emits upper-case role names.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "pharmacist" => Ok(Self::Pharmacist),
            "pharmacy_admin" => Ok(Self::PharmacyAdmin),
            "admin" => Ok(Self::Admin),
            other => Err(ProtocolError::InvalidField {
                field: "role",
                reason: format!("unknown role {other:?}"),
            }),
        }
    }
}

/// Frames sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    /// Protocol-level authentication. Sent after every transport open.
    Auth {
        /// Bearer token
        token: String,
        /// Authenticated user
        user_id: UserId,
        /// Role of the authenticated user
        role: Role,
    },

    /// Start receiving broadcasts on a topic.
    Subscribe {
        /// Topic to subscribe to
        topic: Topic,
    },

    /// Stop receiving broadcasts on a topic.
    Unsubscribe {
        /// Topic to unsubscribe from
        topic: Topic,
    },

    /// Publish a body to an application destination.
    Publish {
        /// Target destination
        destination: Destination,
        /// JSON body
        body: Value,
    },
}

impl ClientFrame {
    /// Build a publish frame from any serializable body.
    pub fn publish<T: Serialize>(destination: Destination, body: &T) -> Result<Self> {
        Ok(Self::Publish { destination, body: serde_json::to_value(body)? })
    }

    /// Encode to JSON text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Frames sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    /// Authentication accepted. Completes the connect handshake.
    AuthSuccess {
        /// Server-assigned session identifier, if the server issues one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Authentication rejected.
    AuthError {
        /// Human-readable reason
        message: String,
    },

    /// Broadcast on a subscribed topic.
    Message {
        /// Topic the broadcast was published on
        topic: Topic,
        /// JSON body, shape depends on the topic channel
        body: Value,
    },

    /// Server-side error not tied to authentication.
    Error {
        /// Human-readable reason
        message: String,
    },
}

impl ServerFrame {
    /// Build a topic broadcast from any serializable body.
    pub fn message<T: Serialize>(topic: Topic, body: &T) -> Result<Self> {
        Ok(Self::Message { topic, body: serde_json::to_value(body)? })
    }

    /// Encode to JSON text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
