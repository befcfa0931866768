//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the swarm gateway.

/// Configuration loading.
pub mod config;

/// Swarm WebSocket gateway and connection supervisor.
pub mod gateway;

/// Hiven REST API client.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
