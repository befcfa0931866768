//! Domain Layer - Core client types.
//!
//! Session envelopes, connection state, credentials and the entity model.
//! Nothing here performs I/O.

/// Id-keyed entity caches.
pub mod cache;

/// Connection lifecycle state.
pub mod connection;

/// Access token validation.
pub mod credentials;

/// Users, houses, rooms and members.
pub mod entities;

/// Swarm envelopes and opcodes.
pub mod envelope;
