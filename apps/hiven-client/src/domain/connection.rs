//! Connection lifecycle state.

use std::fmt;

/// Lifecycle state of the client connection.
///
/// Only the connection supervisor writes this value. A lifecycle attempt
/// moves `Closed → Opening → Open → Closing → Closed`; a restart re-enters
/// `Opening` and begins a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and no lifecycle running.
    #[default]
    Closed,
    /// Request transport is being validated or a stream session is being
    /// created and authenticated.
    Opening,
    /// The stream session has been acknowledged by the server.
    Open,
    /// Shutdown has been requested and teardown is in progress.
    Closing,
}

impl ConnectionState {
    /// Whether the supervisor may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Closed | Self::Opening | Self::Open, Self::Opening)
                | (Self::Opening, Self::Open)
                | (Self::Opening | Self::Open, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Whether a lifecycle is currently running.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Opening | Self::Open)
    }

    /// Numeric value exported as a gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Opening => 1.0,
            Self::Open => 2.0,
            Self::Closing => 3.0,
        }
    }

    /// Upper-case state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Opening => "OPENING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
