//! Application Ports
//!
//! Interfaces the application layer drives. Infrastructure adapters
//! implement them.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RequestTransport`: the Hiven REST API

mod request_transport_port;

#[cfg(test)]
pub use request_transport_port::MockRequestTransport;
pub use request_transport_port::{HttpError, RequestTransport};
