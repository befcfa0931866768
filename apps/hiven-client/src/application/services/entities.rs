//! Entity Service
//!
//! REST operations on Hiven entities. Responses are unwrapped from the API
//! envelope and parsed into typed entities; fetched users and houses are
//! kept in the client cache.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::application::ports::{HttpError, RequestTransport};
use crate::domain::cache::ClientCache;
use crate::domain::entities::{EntityError, Invite, Member, Message, User, response_data};

/// Entity service errors.
#[derive(Debug, thiserror::Error)]
pub enum EntityServiceError {
    /// The request failed.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The response did not contain a valid entity.
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// An edit with no fields set.
    #[error("nothing to update")]
    EmptyPatch,
}

/// Editable room fields. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoomPatch {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// New emoji.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// Editable fields of the client user. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserPatch {
    /// New username.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// New bio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// New location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// New website.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// New icon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// New header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// REST operations on users, houses, rooms and messages.
#[derive(Clone)]
pub struct EntityService {
    transport: Arc<dyn RequestTransport>,
    cache: Arc<ClientCache>,
}

impl std::fmt::Debug for EntityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("connected", &self.transport.is_connected())
            .finish_non_exhaustive()
    }
}

impl EntityService {
    /// Create a service over `transport`, caching into `cache`.
    #[must_use]
    pub fn new(transport: Arc<dyn RequestTransport>, cache: Arc<ClientCache>) -> Self {
        Self { transport, cache }
    }

    /// Fetch a user and cache it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the user is unknown.
    pub async fn fetch_user(&self, user_id: &str) -> Result<User, EntityServiceError> {
        let response = self
            .transport
            .request(&format!("/users/{user_id}"), None)
            .await?;
        let user = User::full(response_data(&response))?;
        self.cache.users.put(user.id().to_owned(), user.clone());
        tracing::debug!(user_id = %user.id(), "Fetched user");
        Ok(user)
    }

    /// Fetch a member of a house.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the member is unknown.
    pub async fn fetch_member(
        &self,
        house_id: &str,
        user_id: &str,
    ) -> Result<Member, EntityServiceError> {
        let response = self
            .transport
            .request(&format!("/houses/{house_id}/users/{user_id}"), None)
            .await?;
        Ok(Member::from_json(response_data(&response))?)
    }

    /// Edit the client user.
    ///
    /// # Errors
    ///
    /// Returns [`EntityServiceError::EmptyPatch`] when no field is set, or
    /// the request error.
    pub async fn edit_client_user(&self, patch: &UserPatch) -> Result<(), EntityServiceError> {
        let body = patch_body(patch)?;
        self.transport.patch("/users/@me", Some(body), None).await?;
        Ok(())
    }

    /// Edit a room.
    ///
    /// # Errors
    ///
    /// Returns [`EntityServiceError::EmptyPatch`] when no field is set, or
    /// the request error.
    pub async fn patch_room(
        &self,
        room_id: &str,
        patch: &RoomPatch,
    ) -> Result<(), EntityServiceError> {
        let body = patch_body(patch)?;
        self.transport
            .patch(&format!("/rooms/{room_id}"), Some(body), None)
            .await?;
        tracing::debug!(room_id, "Patched room");
        Ok(())
    }

    /// Create an invite to a house.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no invite is returned.
    pub async fn create_invite(
        &self,
        house_id: &str,
        max_uses: Option<u32>,
    ) -> Result<Invite, EntityServiceError> {
        let body = max_uses.map(|max_uses| serde_json::json!({ "max_uses": max_uses }));
        let response = self
            .transport
            .post(&format!("/houses/{house_id}/invites"), body, None)
            .await?;
        Ok(Invite::from_json(response_data(&response))?)
    }

    /// Post a text message to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or no message is returned.
    pub async fn send_message(
        &self,
        room_id: &str,
        content: &str,
    ) -> Result<Message, EntityServiceError> {
        let response = self
            .transport
            .post(
                &format!("/rooms/{room_id}/messages"),
                Some(serde_json::json!({ "content": content })),
                None,
            )
            .await?;
        Ok(Message::from_json(response_data(&response))?)
    }

    /// Delete a message.
    ///
    /// # Errors
    ///
    /// Returns the request error.
    pub async fn delete_message(
        &self,
        room_id: &str,
        message_id: &str,
    ) -> Result<(), EntityServiceError> {
        self.transport
            .delete(&format!("/rooms/{room_id}/messages/{message_id}"), None)
            .await?;
        Ok(())
    }

    /// Leave a house and drop it from the cache.
    ///
    /// # Errors
    ///
    /// Returns the request error.
    pub async fn leave_house(&self, house_id: &str) -> Result<(), EntityServiceError> {
        self.transport
            .delete(&format!("/users/@me/houses/{house_id}"), None)
            .await?;
        if let Some(house) = self.cache.houses.remove(house_id) {
            for room in &house.core().rooms {
                self.cache.rooms.remove(&room.id);
            }
        }
        Ok(())
    }
}

fn patch_body<T: Serialize>(patch: &T) -> Result<Value, EntityServiceError> {
    match serde_json::to_value(patch) {
        Ok(Value::Object(fields)) if !fields.is_empty() => Ok(Value::Object(fields)),
        _ => Err(EntityServiceError::EmptyPatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::application::ports::MockRequestTransport;
    use crate::domain::entities::House;

    fn service(transport: MockRequestTransport) -> (EntityService, Arc<ClientCache>) {
        let cache = Arc::new(ClientCache::new());
        (
            EntityService::new(Arc::new(transport), Arc::clone(&cache)),
            cache,
        )
    }

    #[tokio::test]
    async fn fetch_user_caches_the_result() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_request()
            .withf(|endpoint, timeout| endpoint == "/users/42" && timeout.is_none())
            .times(1)
            .returning(|_, _| {
                Ok(json!({
                    "success": true,
                    "data": {"id": "42", "username": "alice", "name": "Alice", "location": "Vienna"}
                }))
            });
        let (service, cache) = service(transport);

        let user = service.fetch_user("42").await.unwrap();
        assert!(!user.is_lazy());
        assert_eq!(user.details().and_then(|d| d.location.as_deref()), Some("Vienna"));
        assert_eq!(cache.users.get("42").unwrap().username(), "alice");
    }

    #[tokio::test]
    async fn missing_user_is_not_found() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_request()
            .returning(|_, _| Ok(json!({"success": true, "data": null})));
        let (service, cache) = service(transport);

        let err = service.fetch_user("42").await.unwrap_err();
        assert!(matches!(
            err,
            EntityServiceError::Entity(EntityError::NotFound { entity: "user" })
        ));
        assert!(cache.users.is_empty());
    }

    #[tokio::test]
    async fn http_errors_pass_through() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_request()
            .returning(|_, _| Err(HttpError::NotConnected));
        let (service, _) = service(transport);

        assert!(matches!(
            service.fetch_member("1", "2").await.unwrap_err(),
            EntityServiceError::Http(HttpError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn patch_room_sends_only_set_fields() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_patch()
            .withf(|endpoint, body, _| {
                endpoint == "/rooms/10" && body.as_ref() == Some(&json!({"name": "lounge"}))
            })
            .times(1)
            .returning(|_, _, _| Ok(Value::Null));
        let (service, _) = service(transport);

        let patch = RoomPatch {
            name: Some("lounge".to_string()),
            ..RoomPatch::default()
        };
        service.patch_room("10", &patch).await.unwrap();
    }

    #[tokio::test]
    async fn empty_patch_is_rejected_locally() {
        let mut transport = MockRequestTransport::new();
        transport.expect_patch().times(0);
        let (service, _) = service(transport);

        assert!(matches!(
            service.edit_client_user(&UserPatch::default()).await,
            Err(EntityServiceError::EmptyPatch)
        ));
    }

    #[tokio::test]
    async fn create_invite_parses_response() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_post()
            .withf(|endpoint, body, _| {
                endpoint == "/houses/1/invites" && body.as_ref() == Some(&json!({"max_uses": 5}))
            })
            .returning(|_, _, _| {
                Ok(json!({"success": true, "data": {"code": "xyz", "house_id": "1", "max_uses": 5}}))
            });
        let (service, _) = service(transport);

        let invite = service.create_invite("1", Some(5)).await.unwrap();
        assert_eq!(invite.url(), "https://hiven.house/xyz");
        assert_eq!(invite.max_uses, Some(5));
    }

    #[tokio::test]
    async fn send_and_delete_message() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_post()
            .withf(|endpoint, body, _| {
                endpoint == "/rooms/10/messages" && body.as_ref() == Some(&json!({"content": "hi"}))
            })
            .returning(|_, _, _| {
                Ok(json!({"success": true, "data": {"id": "99", "room_id": "10", "content": "hi"}}))
            });
        transport
            .expect_delete()
            .withf(|endpoint, _| endpoint == "/rooms/10/messages/99")
            .times(1)
            .returning(|_, _| Ok(Value::Null));
        let (service, _) = service(transport);

        let message = service.send_message("10", "hi").await.unwrap();
        assert_eq!(message.id, "99");
        service.delete_message("10", &message.id).await.unwrap();
    }

    #[tokio::test]
    async fn leave_house_evicts_house_and_rooms() {
        let mut transport = MockRequestTransport::new();
        transport
            .expect_delete()
            .withf(|endpoint, _| endpoint == "/users/@me/houses/1")
            .returning(|_, _| Ok(Value::Null));
        let (service, cache) = service(transport);
        cache.put_house(
            House::lazy(&json!({
                "id": "1",
                "name": "Hiven",
                "rooms": [{"id": "10", "name": "general"}],
            }))
            .unwrap(),
        );
        assert!(cache.rooms.get("10").is_some());

        service.leave_house("1").await.unwrap();
        assert!(cache.houses.get("1").is_none());
        assert!(cache.rooms.get("10").is_none());
    }
}
