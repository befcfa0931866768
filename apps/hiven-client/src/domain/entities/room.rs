use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityError, id, parse};

/// Room variant announced in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum RoomKind {
    /// Text room.
    #[default]
    Text,
    /// Portal (voice) room.
    Portal,
    /// A room type this client does not know yet.
    Other(u8),
}

impl From<u8> for RoomKind {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Text,
            1 => Self::Portal,
            other => Self::Other(other),
        }
    }
}

impl From<RoomKind> for u8 {
    fn from(kind: RoomKind) -> Self {
        match kind {
            RoomKind::Text => 0,
            RoomKind::Portal => 1,
            RoomKind::Other(code) => code,
        }
    }
}

/// A room inside a house.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Snowflake id.
    #[serde(deserialize_with = "id::deserialize")]
    pub id: String,
    /// Room name.
    pub name: String,
    /// Owning house.
    #[serde(default, deserialize_with = "id::deserialize_opt")]
    pub house_id: Option<String>,
    /// Sort position inside the house.
    #[serde(default)]
    pub position: Option<i64>,
    /// Room type.
    #[serde(default, rename = "type")]
    pub kind: RoomKind,
    /// Emoji object, `{"type": ..., "data": ...}`.
    #[serde(default)]
    pub emoji: Option<Value>,
    /// Room description.
    #[serde(default)]
    pub description: Option<String>,
    /// Id of the most recent message.
    #[serde(default, deserialize_with = "id::deserialize_opt")]
    pub last_message_id: Option<String>,
}

impl Room {
    /// Build a room from its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid room.
    pub fn from_json(data: &Value) -> Result<Self, EntityError> {
        parse("room", data)
    }

    /// Emoji data string, if the room has one.
    #[must_use]
    pub fn emoji_data(&self) -> Option<&str> {
        self.emoji.as_ref()?.get("data")?.as_str()
    }
}

/// A message posted to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Snowflake id.
    #[serde(deserialize_with = "id::deserialize")]
    pub id: String,
    /// Room the message was posted to.
    #[serde(deserialize_with = "id::deserialize")]
    pub room_id: String,
    /// Author of the message.
    #[serde(default, deserialize_with = "id::deserialize_opt")]
    pub author_id: Option<String>,
    /// Text content.
    #[serde(default)]
    pub content: String,
    /// Unix timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl Message {
    /// Build a message from its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid message.
    pub fn from_json(data: &Value) -> Result<Self, EntityError> {
        parse("message", data)
    }
}
