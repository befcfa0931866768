use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EntityError, id, parse};

/// Fields present on every user payload, including lazy ones embedded in
/// members and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCore {
    /// Snowflake id.
    #[serde(deserialize_with = "id::deserialize")]
    pub id: String,
    /// Unique handle.
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Profile bio.
    #[serde(default)]
    pub bio: Option<String>,
    /// Icon asset id.
    #[serde(default)]
    pub icon: Option<String>,
    /// Header asset id.
    #[serde(default)]
    pub header: Option<String>,
    /// Whether the account is a bot.
    #[serde(default)]
    pub bot: bool,
    /// Whether the email address is verified.
    #[serde(default)]
    pub email_verified: Option<bool>,
    /// Account flags, numeric or string depending on API version.
    #[serde(default)]
    pub flags: Option<Value>,
}

/// Fields only returned when a user is fetched directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    /// Profile location.
    #[serde(default)]
    pub location: Option<String>,
    /// Profile website.
    #[serde(default)]
    pub website: Option<String>,
    /// Presence string (`online`, `idle`, ...).
    #[serde(default)]
    pub presence: Option<String>,
    /// Account email, only present for the client user.
    #[serde(default)]
    pub email: Option<String>,
    /// Whether the client user blocked this user.
    #[serde(default)]
    pub blocked: Option<bool>,
    /// Whether multi-factor auth is enabled.
    #[serde(default)]
    pub mfa_enabled: Option<bool>,
}

/// A Hiven user.
///
/// A lazy user carries only [`UserCore`]; a full user also carries
/// [`UserDetails`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    core: UserCore,
    details: Option<UserDetails>,
}

impl User {
    /// Build a lazy user from an embedded payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid user.
    pub fn lazy(data: &Value) -> Result<Self, EntityError> {
        Ok(Self {
            core: parse("user", data)?,
            details: None,
        })
    }

    /// Build a full user from a fetched payload.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] when the payload is not a valid user.
    pub fn full(data: &Value) -> Result<Self, EntityError> {
        Ok(Self {
            core: parse("user", data)?,
            details: Some(parse("user", data)?),
        })
    }

    /// Core fields.
    #[must_use]
    pub const fn core(&self) -> &UserCore {
        &self.core
    }

    /// Extended fields, `None` for lazy users.
    #[must_use]
    pub const fn details(&self) -> Option<&UserDetails> {
        self.details.as_ref()
    }

    /// Whether only the core fields are known.
    #[must_use]
    pub const fn is_lazy(&self) -> bool {
        self.details.is_none()
    }

    /// Snowflake id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.core.id
    }

    /// Unique handle.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.core.username
    }

    /// Replace the core fields, keeping any known details.
    #[must_use]
    pub fn with_core(&self, core: UserCore) -> Self {
        Self {
            core,
            details: self.details.clone(),
        }
    }
}

impl From<UserCore> for User {
    fn from(core: UserCore) -> Self {
        Self {
            core,
            details: None,
        }
    }
}
