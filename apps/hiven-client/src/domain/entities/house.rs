use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityError, Member, Room, id, parse};

/// Fields present on every house payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseCore {
    /// Snowflake id.
    #[serde(deserialize_with = "id::deserialize")]
    pub id: String,
    /// House name.
    pub name: String,
    /// Icon asset id.
    #[serde(default)]
    pub icon: Option<String>,
    /// Owner user id.
    #[serde(default, deserialize_with = "id::deserialize_opt")]
    pub owner_id: Option<String>,
    /// Rooms of the house.
    #[serde(default)]
    pub rooms: Vec<Room>,
}

/// Fields only present in `HOUSE_JOIN` payloads and direct fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HouseDetails {
    /// Banner asset id.
    #[serde(default)]
    pub banner: Option<String>,
    /// Role objects.
    #[serde(default)]
    pub roles: Vec<Value>,
    /// Permission bits granted to every member.
    #[serde(default)]
    pub default_permissions: Option<i64>,
    /// Known members.
    #[serde(default)]
    pub members: Vec<Member>,
}

/// A Hiven house (community).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct House {
    core: HouseCore,
    details: Option<HouseDetails>,
}

impl House {
    /// Build a lazy house from an embedded payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid house.
    pub fn lazy(data: &Value) -> Result<Self, EntityError> {
        Ok(Self {
            core: parse("house", data)?,
            details: None,
        })
    }

    /// Build a full house, including members and roles.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid house.
    pub fn full(data: &Value) -> Result<Self, EntityError> {
        Ok(Self {
            core: parse("house", data)?,
            details: Some(parse("house", data)?),
        })
    }

    /// Core fields.
    #[must_use]
    pub const fn core(&self) -> &HouseCore {
        &self.core
    }

    /// Extended fields, `None` for lazy houses.
    #[must_use]
    pub const fn details(&self) -> Option<&HouseDetails> {
        self.details.as_ref()
    }

    /// Snowflake id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Look up a room of this house by id.
    #[must_use]
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.core.rooms.iter().find(|room| room.id == room_id)
    }
}

/// An invite to a house.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Invite {
    /// Invite code.
    pub code: String,
    /// House the invite grants access to.
    #[serde(default, deserialize_with = "id::deserialize_opt")]
    pub house_id: Option<String>,
    /// Maximum number of uses, `None` for unlimited.
    #[serde(default)]
    pub max_uses: Option<u32>,
}

impl Invite {
    /// Build an invite from its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid invite.
    pub fn from_json(data: &Value) -> Result<Self, EntityError> {
        parse("invite", data)
    }

    /// Shareable invite URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("https://hiven.house/{}", self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "id": "1",
            "name": "Hiven",
            "owner_id": "2",
            "rooms": [{"id": "10", "name": "general", "type": 0}],
            "roles": [],
            "default_permissions": 0,
            "members": [{
                "user": {"id": "2", "username": "owner"},
                "user_id": "2",
                "house_id": "1",
                "joined_at": "2020-09-01T12:00:00Z",
            }],
        })
    }

    #[test]
    fn lazy_house_keeps_rooms() {
        let house = House::lazy(&payload()).unwrap();
        assert!(house.details().is_none());
        assert_eq!(house.room("10").map(|room| room.name.as_str()), Some("general"));
        assert!(house.room("11").is_none());
    }

    #[test]
    fn full_house_parses_members() {
        let house = House::full(&payload()).unwrap();
        let details = house.details().unwrap();
        assert_eq!(details.members.len(), 1);
        assert_eq!(details.members[0].user().username(), "owner");
    }

    #[test]
    fn invite_url() {
        let invite = Invite::from_json(&json!({"code": "abc", "house_id": "1"})).unwrap();
        assert_eq!(invite.url(), "https://hiven.house/abc");
    }
}
