//! Swarm Gateway
//!
//! The WebSocket side of the client:
//!
//! - **codec**: JSON frames to envelopes and back
//! - **session**: one connection, its handshake and listening loop
//! - **heartbeat**: periodic keep-alive frames
//! - **dispatch**: buffered hand-off of envelopes to handlers
//! - **reconnect**: backoff between failed attempts
//! - **supervisor**: the lifecycle tying them together

pub mod codec;
pub mod dispatch;
pub mod heartbeat;
pub mod reconnect;
pub mod session;
pub mod supervisor;

pub use codec::{CodecError, EnvelopeCodec};
pub use dispatch::{
    DispatchError, DispatchMode, DispatchQueue, Handler, HandlerRegistry, in_handler,
};
pub use heartbeat::{HeartbeatMonitor, HeartbeatRecord, KeepAliveError};
pub use reconnect::{BackoffConfig, RestartBackoff};
pub use session::{
    FrameSink, HandshakeFailure, ListenExit, SessionWriter, StreamSession, StreamSessionError,
};
pub use supervisor::{
    AttemptError, ConnectionError, ConnectionStateCell, ConnectionSupervisor, Recovery,
    SessionError,
};
