//! Hiven Client
//!
//! Cloneable handle composing the connection supervisor, handler registry,
//! entity cache and entity service. The cache is kept current from
//! `HOUSE_JOIN`, `HOUSE_LEAVE` and `USER_UPDATE` events.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use crate::application::ports::{HttpError, RequestTransport};
use crate::application::services::EntityService;
use crate::domain::cache::ClientCache;
use crate::domain::connection::ConnectionState;
use crate::domain::entities::{House, User};
use crate::domain::envelope::Envelope;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::gateway::{ConnectionError, ConnectionSupervisor, HandlerRegistry};
use crate::infrastructure::http::HttpTransport;

/// Handle to a Hiven client. Clones share the same connection.
#[derive(Clone)]
pub struct HivenClient {
    inner: Arc<Inner>,
}

struct Inner {
    supervisor: ConnectionSupervisor,
    registry: Arc<HandlerRegistry>,
    cache: Arc<ClientCache>,
    entities: EntityService,
}

impl std::fmt::Debug for HivenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HivenClient")
            .field("supervisor", &self.inner.supervisor)
            .finish_non_exhaustive()
    }
}

impl HivenClient {
    /// Create a client talking to the REST API described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, HttpError> {
        let transport = HttpTransport::new(&config.api)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over an existing request transport.
    #[must_use]
    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn RequestTransport>) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let cache = Arc::new(ClientCache::new());
        register_cache_handlers(&registry, &cache);

        let supervisor = ConnectionSupervisor::new(
            config,
            Arc::clone(&transport),
            Arc::clone(&registry),
            Arc::clone(&cache),
        );
        let entities = EntityService::new(transport, Arc::clone(&cache));

        Self {
            inner: Arc::new(Inner {
                supervisor,
                registry,
                cache,
                entities,
            }),
        }
    }

    /// Register a handler for `event`.
    ///
    /// Event names are case-insensitive. Envelopes without an event name
    /// are dispatched under their opcode name, e.g. `HEARTBEAT`.
    pub fn on<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.registry.register(event, handler);
    }

    /// Connect and keep the connection alive until [`close`](Self::close).
    ///
    /// With `allow_restart`, unexpected failures restart the session
    /// after a backoff instead of ending the lifecycle.
    ///
    /// # Errors
    ///
    /// See [`ConnectionSupervisor::connect`].
    pub async fn connect(&self, token: &str, allow_restart: bool) -> Result<(), ConnectionError> {
        self.inner.supervisor.connect(token, allow_restart).await
    }

    /// Close the connection. See [`ConnectionSupervisor::close`].
    pub async fn close(&self, force: bool) {
        self.inner.supervisor.close(force).await;
    }

    /// Re-send the `AUTH` frame.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is open or the write fails.
    pub async fn send_auth(&self) -> Result<(), ConnectionError> {
        self.inner.supervisor.send_auth().await
    }

    /// Send an envelope on the open session.
    ///
    /// # Errors
    ///
    /// Returns an error if no session is open or the write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        self.inner.supervisor.send(envelope).await
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.supervisor.subscribe()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut state = self.subscribe_state();
        let _ = state.wait_for(|state| *state == target).await;
    }

    /// The authenticated user, once connected.
    #[must_use]
    pub fn client_user(&self) -> Option<Arc<User>> {
        self.inner.supervisor.client_user()
    }

    /// Entity cache.
    #[must_use]
    pub fn cache(&self) -> &ClientCache {
        &self.inner.cache
    }

    /// REST operations on entities.
    #[must_use]
    pub fn entities(&self) -> &EntityService {
        &self.inner.entities
    }
}

fn register_cache_handlers(registry: &HandlerRegistry, cache: &Arc<ClientCache>) {
    let houses = Arc::clone(cache);
    registry.register("HOUSE_JOIN", move |envelope: Arc<Envelope>| {
        let result = House::full(envelope.payload())
            .map(|house| {
                tracing::debug!(house_id = %house.id(), "Caching joined house");
                houses.put_house(house);
            })
            .context("invalid HOUSE_JOIN payload");
        std::future::ready(result)
    });

    let houses = Arc::clone(cache);
    registry.register("HOUSE_LEAVE", move |envelope: Arc<Envelope>| {
        let payload = envelope.payload();
        let result = payload
            .get("house_id")
            .or_else(|| payload.get("id"))
            .and_then(serde_json::Value::as_str)
            .map(|house_id| {
                if let Some(house) = houses.houses.remove(house_id) {
                    for room in &house.core().rooms {
                        houses.rooms.remove(&room.id);
                    }
                }
            })
            .context("HOUSE_LEAVE payload has no house id");
        std::future::ready(result)
    });

    let users = Arc::clone(cache);
    registry.register("USER_UPDATE", move |envelope: Arc<Envelope>| {
        let result = User::lazy(envelope.payload())
            .map(|user| {
                let merged = match users.users.get(user.id()) {
                    Some(known) if known.details().is_some() => known.with_core(user.core().clone()),
                    _ => user,
                };
                users.users.put(merged.id().to_owned(), merged);
            })
            .context("invalid USER_UPDATE payload");
        std::future::ready(result)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::application::ports::MockRequestTransport;

    fn client() -> HivenClient {
        HivenClient::with_transport(&ClientConfig::default(), Arc::new(MockRequestTransport::new()))
    }

    async fn deliver(client: &HivenClient, event: &str, payload: serde_json::Value) {
        let envelope = Arc::new(Envelope::event(event, payload));
        for handler in client.inner.registry.handlers_for(event) {
            handler(Arc::clone(&envelope)).await.unwrap();
        }
    }

    #[test]
    fn new_client_is_closed() {
        let client = client();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(client.client_user().is_none());
        assert!(client.cache().houses.is_empty());
    }

    #[test]
    fn handlers_are_shared_between_clones() {
        let client = client();
        let clone = client.clone();
        clone.on("message_create", |_| async { Ok(()) });
        assert_eq!(client.inner.registry.count("MESSAGE_CREATE"), 1);
    }

    #[tokio::test]
    async fn house_join_and_leave_update_the_cache() {
        let client = client();
        deliver(
            &client,
            "HOUSE_JOIN",
            json!({
                "id": "1",
                "name": "Hiven",
                "rooms": [{"id": "10", "name": "general"}],
                "members": [],
            }),
        )
        .await;
        assert!(client.cache().houses.get("1").unwrap().details().is_some());
        assert!(client.cache().rooms.get("10").is_some());

        deliver(&client, "HOUSE_LEAVE", json!({"house_id": "1"})).await;
        assert!(client.cache().houses.is_empty());
        assert!(client.cache().rooms.is_empty());
    }

    #[tokio::test]
    async fn user_update_keeps_known_details() {
        let client = client();
        client.cache().users.put(
            "42",
            User::full(&json!({"id": "42", "username": "alice", "location": "Vienna"})).unwrap(),
        );

        deliver(&client, "USER_UPDATE", json!({"id": "42", "username": "alice2"})).await;

        let user = client.cache().users.get("42").unwrap();
        assert_eq!(user.username(), "alice2");
        assert_eq!(user.details().and_then(|d| d.location.as_deref()), Some("Vienna"));
    }

    #[tokio::test]
    async fn faulty_payload_fails_the_handler() {
        let client = client();
        let envelope = Arc::new(Envelope::event("HOUSE_JOIN", json!("not a house")));
        let handler = client.inner.registry.handlers_for("HOUSE_JOIN").remove(0);
        assert!(handler(envelope).await.is_err());
        assert!(client.cache().houses.is_empty());
    }

    #[tokio::test]
    async fn wait_for_state_returns_for_current_state() {
        let client = client();
        tokio::time::timeout(
            std::time::Duration::from_millis(100),
            client.wait_for_state(ConnectionState::Closed),
        )
        .await
        .unwrap();
    }
}
