//! Hiven Entity Model
//!
//! Typed records for the objects the REST API and event payloads carry.
//! Variants are composed from a core record and an optional extension:
//! a lazy entity carries only the core, a full entity also carries its
//! details.
//!
//! Parsing never panics on faulty data; every constructor returns a
//! [`EntityError`] instead.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

mod house;
mod member;
mod room;
mod user;

pub use house::{House, HouseCore, HouseDetails, Invite};
pub use member::Member;
pub use room::{Message, Room, RoomKind};
pub use user::{User, UserCore, UserDetails};

/// Errors raised while building an entity from JSON.
#[derive(Debug, Error)]
pub enum EntityError {
    /// The payload does not match the entity's shape.
    #[error("faulty {entity} data: {source}")]
    Faulty {
        /// Entity being built.
        entity: &'static str,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload is not a JSON object.
    #[error("expected a JSON object for {entity}, got {found}")]
    NotAnObject {
        /// Entity being built.
        entity: &'static str,
        /// JSON type that was found instead.
        found: &'static str,
    },

    /// The request returned no entity.
    #[error("{entity} not found")]
    NotFound {
        /// Entity that was requested.
        entity: &'static str,
    },
}

/// Deserialize `value` as entity `T`, naming the entity in errors.
pub(crate) fn parse<T: DeserializeOwned>(
    entity: &'static str,
    value: &Value,
) -> Result<T, EntityError> {
    match value {
        Value::Object(_) => T::deserialize(value).map_err(|source| EntityError::Faulty {
            entity,
            source,
        }),
        Value::Null => Err(EntityError::NotFound { entity }),
        other => Err(EntityError::NotAnObject {
            entity,
            found: json_type(other),
        }),
    }
}

/// Body of a REST response.
///
/// The API wraps payloads as `{"success": true, "data": {...}}`; bare
/// payloads are returned unchanged.
#[must_use]
pub fn response_data(value: &Value) -> &Value {
    match value.get("data") {
        Some(data) if value.get("success").is_some() => data,
        _ => value,
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Hiven ids are snowflakes that older API versions sent as numbers.
pub(crate) mod id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(text) => text,
                RawId::Number(number) => number.to_string(),
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        RawId::deserialize(deserializer).map(String::from)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Option::<RawId>::deserialize(deserializer).map(|raw| raw.map(String::from))
    }
}
