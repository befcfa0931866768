//! Entity Cache
//!
//! Id-keyed storage for entities seen on the swarm or fetched over REST.
//! The cache is owned by the client and handed out by `Arc` handle; it has
//! no eviction or expiry policy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::entities::{House, Room, User};

/// Thread-safe map from entity id to a shared entity.
#[derive(Debug)]
pub struct EntityCache<V> {
    entries: RwLock<HashMap<String, Arc<V>>>,
}

impl<V> Default for EntityCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> EntityCache<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an entity by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<V>> {
        self.entries.read().get(id).cloned()
    }

    /// Insert or replace an entity, returning the previous one.
    pub fn put(&self, id: impl Into<String>, value: V) -> Option<Arc<V>> {
        self.entries.write().insert(id.into(), Arc::new(value))
    }

    /// Remove an entity, returning it if it was cached.
    pub fn remove(&self, id: &str) -> Option<Arc<V>> {
        self.entries.write().remove(id)
    }

    /// Number of cached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entity.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Caches for every entity kind the client tracks.
#[derive(Debug, Default)]
pub struct ClientCache {
    /// Users by id.
    pub users: EntityCache<User>,
    /// Houses by id.
    pub houses: EntityCache<House>,
    /// Rooms by id.
    pub rooms: EntityCache<Room>,
}

impl ClientCache {
    /// Create empty caches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a house and each of its rooms.
    pub fn put_house(&self, house: House) {
        for room in &house.core().rooms {
            self.rooms.put(room.id.clone(), room.clone());
        }
        self.houses.put(house.id().to_owned(), house);
    }

    /// Clear every cache.
    pub fn clear(&self) {
        self.users.clear();
        self.houses.clear();
        self.rooms.clear();
    }
}
