//! Wire codec for the signaling channel.
//!
//! One JSON object per text frame, discriminated by a `"type"` field:
//! `offer`, `answer`, or `ice`. Text fields never carry raw line breaks on
//! the wire; carriage returns and newlines inside an SDP are escaped to the
//! literal two-character sequences `\r` / `\n` by JSON string encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single signaling frame exchanged with the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    #[serde(rename = "ice")]
    IceCandidate {
        candidate: String,
        #[serde(rename = "sdpMid")]
        sdp_mid: String,
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: u16,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown or missing message type")]
    UnknownType,
    #[error("malformed signaling frame: {0}")]
    Malformed(String),
}

/// Serialize a message to its single-line wire form.
pub fn encode(message: &SignalingMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

/// Parse one inbound text frame.
///
/// The discriminator is inspected before the body so that an unrecognized
/// message kind is reported as [`DecodeError::UnknownType`] rather than a
/// generic parse failure. Callers drop undecodable frames; a bad frame is
/// never fatal to the transport.
pub fn decode(text: &str) -> Result<SignalingMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| DecodeError::Malformed(err.to_string()))?;
    let known_type = matches!(
        value.get("type").and_then(Value::as_str),
        Some("offer" | "answer" | "ice")
    );
    if !known_type {
        return Err(DecodeError::UnknownType);
    }
    serde_json::from_value(value).map_err(|err| DecodeError::Malformed(err.to_string()))
}
