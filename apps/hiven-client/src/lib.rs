#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Hiven Client - Swarm Gateway and REST Client
//!
//! Keeps one authenticated WebSocket session to the Hiven swarm alive,
//! dispatches inbound events to registered handlers, and restarts the
//! session when it fails.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Envelopes, connection state, credentials, entities
//!   - `envelope`: Swarm frames and opcodes
//!   - `connection`: Lifecycle states and transitions
//!   - `entities`: Users, houses, rooms, members
//!   - `cache`: Id-keyed entity caches
//!
//! - **Application**: Port definitions and services
//!   - `ports`: The request transport interface
//!   - `services`: Entity operations over the REST API
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: Stream session, heartbeat, dispatch queue, supervisor
//!   - `http`: Hiven REST API client
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Observability
//!
//! # Lifecycle
//!
//! ```text
//!            connect()
//! CLOSED ───────────────► OPENING ── AUTH_ACK ──► OPEN
//!   ▲                       ▲  │                   │
//!   │                       │  └── failure ────────┤
//!   │                       └──── restart ◄────────┤
//!   └──────────────────── CLOSING ◄── close() ─────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core client types with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Client facade.
pub mod client;

// =============================================================================
// Re-exports
// =============================================================================

pub use client::HivenClient;

// Domain types
pub use domain::cache::{ClientCache, EntityCache};
pub use domain::connection::ConnectionState;
pub use domain::credentials::{CredentialError, Token};
pub use domain::entities::{
    EntityError, House, Invite, Member, Message, Room, RoomKind, User,
};
pub use domain::envelope::{Envelope, Handshake, OpCode};

// Application
pub use application::ports::{HttpError, RequestTransport};
pub use application::services::{EntityService, EntityServiceError, RoomPatch, UserPatch};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError};

// Gateway
pub use infrastructure::gateway::{
    AttemptError, ConnectionError, DispatchMode, HandshakeFailure, KeepAliveError, SessionError,
    in_handler,
};

// HTTP
pub use infrastructure::http::HttpTransport;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
