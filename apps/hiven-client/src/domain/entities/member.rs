use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::{EntityError, User, UserCore, id, parse};

/// A user's membership in a house.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "MemberRecord")]
pub struct Member {
    user: User,
    house_id: String,
    joined_at: Option<DateTime<Utc>>,
    roles: Vec<Value>,
}

#[derive(Deserialize)]
struct MemberRecord {
    user: UserCore,
    #[serde(deserialize_with = "id::deserialize")]
    house_id: String,
    #[serde(default)]
    joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    roles: Option<Value>,
}

impl From<MemberRecord> for Member {
    fn from(record: MemberRecord) -> Self {
        // Roles arrive as an array, an object keyed by id, or null.
        let roles = match record.roles {
            Some(Value::Array(roles)) => roles,
            Some(Value::Object(roles)) => roles.into_iter().map(|(_, role)| role).collect(),
            _ => Vec::new(),
        };
        Self {
            user: User::from(record.user),
            house_id: record.house_id,
            joined_at: record.joined_at,
            roles,
        }
    }
}

impl Member {
    /// Build a member from its JSON payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid member.
    pub fn from_json(data: &Value) -> Result<Self, EntityError> {
        parse("member", data)
    }

    /// The member's (lazy) user.
    #[must_use]
    pub const fn user(&self) -> &User {
        &self.user
    }

    /// House the membership belongs to.
    #[must_use]
    pub fn house_id(&self) -> &str {
        &self.house_id
    }

    /// When the user joined the house.
    #[must_use]
    pub const fn joined_at(&self) -> Option<DateTime<Utc>> {
        self.joined_at
    }

    /// Role objects assigned to the member.
    #[must_use]
    pub fn roles(&self) -> &[Value] {
        &self.roles
    }
}
