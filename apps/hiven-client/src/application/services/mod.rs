//! Application Services
//!
//! - `EntityService`: user, member, room, invite and message operations
//!   over the request transport, keeping the client cache current

mod entities;

pub use entities::{EntityService, EntityServiceError, RoomPatch, UserPatch};
