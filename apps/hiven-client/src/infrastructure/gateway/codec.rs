//! Swarm Codec
//!
//! JSON encoding and decoding for swarm frames.
//!
//! # Wire Format
//!
//! ```json
//! {"op": 0, "e": "MESSAGE_CREATE", "d": {"content": "hi"}}
//! ```
//!
//! The first server frame uses the `HEARTBEAT` opcode and announces the
//! heartbeat interval in milliseconds:
//!
//! ```json
//! {"op": 1, "d": {"hbt_int": 30000}}
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::envelope::{Envelope, Handshake, OpCode};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown opcode.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u64),

    /// Invalid frame format.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    op: u64,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame<'a> {
    op: u8,
    d: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    e: Option<&'a str>,
}

/// JSON codec for swarm envelopes.
#[derive(Debug, Default, Clone)]
pub struct EnvelopeCodec;

impl EnvelopeCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object with a known
    /// opcode.
    pub fn decode(&self, text: &str) -> Result<Envelope, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            let preview: String = trimmed.chars().take(50).collect();
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {preview}..."
            )));
        }

        let frame: InboundFrame = serde_json::from_str(trimmed)?;
        let opcode = OpCode::from_code(frame.op).ok_or(CodecError::UnknownOpcode(frame.op))?;
        Ok(Envelope::new(opcode, frame.e, frame.d))
    }

    /// Encode an envelope into a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<String, CodecError> {
        let frame = OutboundFrame {
            op: envelope.opcode().code(),
            d: envelope.payload(),
            e: envelope.event_name(),
        };
        Ok(serde_json::to_string(&frame)?)
    }

    /// Extract the handshake parameters from the first server frame.
    ///
    /// The interval is read from `hbt_int`, falling back to
    /// `heartbeat_interval`. Both it and the optional `close_timeout` are
    /// milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidFormat`] if the frame is not a
    /// `HEARTBEAT` frame or does not announce a positive interval.
    pub fn decode_handshake(&self, envelope: &Envelope) -> Result<Handshake, CodecError> {
        if envelope.opcode() != OpCode::Heartbeat {
            return Err(CodecError::InvalidFormat(format!(
                "expected HEARTBEAT handshake frame, got {}",
                envelope.opcode()
            )));
        }

        let payload = envelope.payload();
        let interval_ms = payload
            .get("hbt_int")
            .or_else(|| payload.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .ok_or_else(|| {
                CodecError::InvalidFormat("handshake frame has no heartbeat interval".to_string())
            })?;

        let close_timeout = payload
            .get("close_timeout")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        Ok(Handshake {
            heartbeat_interval: Duration::from_millis(interval_ms),
            close_timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_event_frame() {
        let codec = EnvelopeCodec::new();
        let envelope = codec
            .decode(r#"{"op":0,"e":"MESSAGE_CREATE","d":{"content":"hi"}}"#)
            .unwrap();
        assert_eq!(envelope.opcode(), OpCode::Event);
        assert_eq!(envelope.event_name(), Some("MESSAGE_CREATE"));
        assert_eq!(envelope.payload()["content"], "hi");
    }

    #[test]
    fn decode_defaults_missing_payload_to_null() {
        let envelope = EnvelopeCodec::new().decode(r#"{"op":3}"#).unwrap();
        assert_eq!(envelope.opcode(), OpCode::AuthAck);
        assert_eq!(envelope.payload(), &Value::Null);
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        let err = EnvelopeCodec::new().decode(r#"{"op":9,"d":{}}"#).unwrap_err();
        assert!(matches!(err, CodecError::UnknownOpcode(9)));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let codec = EnvelopeCodec::new();
        assert!(matches!(
            codec.decode(r#"{"op":"#).unwrap_err(),
            CodecError::Json(_)
        ));
        assert!(matches!(
            codec.decode("[1,2,3]").unwrap_err(),
            CodecError::InvalidFormat(_)
        ));
    }

    #[test]
    fn encode_auth_frame() {
        let text = EnvelopeCodec::new().encode(&Envelope::auth("abc")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"op": 2, "d": {"token": "abc"}}));
    }

    #[test]
    fn encode_event_includes_name() {
        let text = EnvelopeCodec::new()
            .encode(&Envelope::event("TYPING_START", json!({"room_id": "1"})))
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["e"], "TYPING_START");
        assert_eq!(value["op"], 0);
    }

    #[test]
    fn handshake_reads_interval_and_close_timeout() {
        let codec = EnvelopeCodec::new();
        let envelope = codec
            .decode(r#"{"op":1,"d":{"hbt_int":30000,"close_timeout":5000}}"#)
            .unwrap();
        let handshake = codec.decode_handshake(&envelope).unwrap();
        assert_eq!(handshake.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(handshake.close_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn handshake_accepts_long_interval_name() {
        let codec = EnvelopeCodec::new();
        let envelope = codec
            .decode(r#"{"op":1,"d":{"heartbeat_interval":50}}"#)
            .unwrap();
        let handshake = codec.decode_handshake(&envelope).unwrap();
        assert_eq!(handshake.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(handshake.close_timeout, None);
    }

    #[test]
    fn handshake_requires_interval() {
        let codec = EnvelopeCodec::new();
        let missing = codec.decode(r#"{"op":1,"d":{}}"#).unwrap();
        assert!(codec.decode_handshake(&missing).is_err());

        let wrong_opcode = codec.decode(r#"{"op":0,"e":"READY","d":{"hbt_int":1}}"#).unwrap();
        assert!(codec.decode_handshake(&wrong_opcode).is_err());
    }
}
