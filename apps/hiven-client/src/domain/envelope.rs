//! Session Envelope Types
//!
//! Every frame exchanged over the swarm connection is wrapped in an
//! envelope carrying an opcode, an optional event name, and an opaque JSON
//! payload.
//!
//! # Wire Shape
//!
//! ```json
//! {"op": 0, "e": "MESSAGE_CREATE", "d": {"content": "hi"}}
//! ```

use std::fmt;
use std::time::Duration;

use serde_json::Value;

// =============================================================================
// Opcodes
// =============================================================================

/// Discriminator for a session envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Application event carrying an event name.
    Event,
    /// Liveness signal. The server's first frame also uses this opcode.
    Heartbeat,
    /// Client authentication request.
    Auth,
    /// Server acknowledgement of a successful authentication.
    AuthAck,
    /// Server-initiated session close.
    Close,
}

impl OpCode {
    /// Numeric code used on the wire.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Event => 0,
            Self::Heartbeat => 1,
            Self::Auth => 2,
            Self::AuthAck => 3,
            Self::Close => 4,
        }
    }

    /// Resolve a wire code into an opcode.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::Event),
            1 => Some(Self::Heartbeat),
            2 => Some(Self::Auth),
            3 => Some(Self::AuthAck),
            4 => Some(Self::Close),
            _ => None,
        }
    }

    /// Upper-case name, used as the dispatch key for non-event envelopes.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "EVENT",
            Self::Heartbeat => "HEARTBEAT",
            Self::Auth => "AUTH",
            Self::AuthAck => "AUTH_ACK",
            Self::Close => "CLOSE",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A decoded frame. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    opcode: OpCode,
    event_name: Option<String>,
    payload: Value,
}

impl Envelope {
    /// Build an envelope from its parts.
    #[must_use]
    pub const fn new(opcode: OpCode, event_name: Option<String>, payload: Value) -> Self {
        Self {
            opcode,
            event_name,
            payload,
        }
    }

    /// Build a named application event.
    #[must_use]
    pub fn event(name: impl Into<String>, payload: Value) -> Self {
        Self::new(OpCode::Event, Some(name.into()), payload)
    }

    /// Build a heartbeat with an empty payload.
    #[must_use]
    pub const fn heartbeat() -> Self {
        Self::new(OpCode::Heartbeat, None, Value::Null)
    }

    /// Build the authentication frame for `token`.
    #[must_use]
    pub fn auth(token: &str) -> Self {
        Self::new(
            OpCode::Auth,
            None,
            serde_json::json!({ "token": token }),
        )
    }

    /// Envelope opcode.
    #[must_use]
    pub const fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Event name, present for `EVENT` envelopes.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.event_name.as_deref()
    }

    /// Raw payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Consume the envelope and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Name handlers are registered under.
    ///
    /// `EVENT` envelopes resolve to their event name; every other opcode
    /// resolves to the opcode name (`AUTH_ACK`, `HEARTBEAT`, ...).
    #[must_use]
    pub fn dispatch_key(&self) -> &str {
        match (self.opcode, self.event_name.as_deref()) {
            (OpCode::Event, Some(name)) => name,
            (opcode, _) => opcode.as_str(),
        }
    }
}

// =============================================================================
// Handshake
// =============================================================================

/// Operational parameters announced by the server in its first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Interval the server expects between client heartbeats.
    pub heartbeat_interval: Duration,
    /// Close-handshake timeout, when the server announces one.
    pub close_timeout: Option<Duration>,
}
