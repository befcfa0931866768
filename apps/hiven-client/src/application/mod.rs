//! Application Layer - Use cases and port definitions.
//!
//! The request transport port and the entity service built on it.

/// Port interfaces for external systems.
pub mod ports;

/// REST operations on Hiven entities.
pub mod services;
