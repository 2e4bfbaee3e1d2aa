//! # Message Model
//!
//! Every unit of the controller protocol is a [`Message`]. A message is encoded into a
//! self-describing JSON frame of the form `{"type": <discriminant>, "payload": <body>}`, which
//! is then carried as a length-prefixed frame on stream transports (see [`crate::net`]) or as a
//! single datagram on broadcast transports.
//!
//! Decoding never falls back to a default: unknown discriminants, missing discriminants,
//! truncated frames and payloads which don't match their discriminant are all reported as a
//! [`FrameError`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod motor;
mod query;
mod sensor;
mod system;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::{error::Category, Value};

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use motor::*;
pub use query::*;
pub use sensor::*;
pub use system::*;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Discriminants of all known message types, as they appear on the wire.
pub const MESSAGE_TYPES: [&str; 9] = [
    "InformationRequest",
    "Temperature",
    "Compass",
    "Gps",
    "SystemStatus",
    "SystemInfo",
    "Motor",
    "Target",
    "Heartbeat",
];

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message of the controller protocol: a request, a response, a command or a broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    InformationRequest(InformationRequest),
    Temperature(TemperatureMessage),
    Compass(CompassMessage),
    Gps(GpsMessage),
    SystemStatus(SystemStatusMessage),
    SystemInfo(SystemInfoMessage),
    Motor(MotorMessage),
    Target(TargetMessage),
    Heartbeat(HeartbeatMessage),
}

/// Errors which can occur while encoding or decoding a frame.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("The frame is truncated")]
    Truncated,

    #[error("The frame is not valid JSON: {0}")]
    Malformed(serde_json::Error),

    #[error("The frame has no \"type\" discriminant")]
    MissingType,

    #[error("\"{0}\" is not a recognised message type")]
    UnknownType(String),

    #[error("The payload is not valid for a {0} message: {1}")]
    InvalidPayload(String, serde_json::Error),

    #[error("Could not serialize the message: {0}")]
    SerializationError(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Message {
    /// Build an information request for the given query.
    pub fn request(query: MessageTypeQuery) -> Self {
        Message::InformationRequest(InformationRequest::new(query))
    }

    /// Build a status message with the given text.
    pub fn status<S: Into<String>>(text: S) -> Self {
        Message::SystemStatus(SystemStatusMessage::new(text))
    }

    /// The wire discriminant of this message.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::InformationRequest(_) => MESSAGE_TYPES[0],
            Message::Temperature(_) => MESSAGE_TYPES[1],
            Message::Compass(_) => MESSAGE_TYPES[2],
            Message::Gps(_) => MESSAGE_TYPES[3],
            Message::SystemStatus(_) => MESSAGE_TYPES[4],
            Message::SystemInfo(_) => MESSAGE_TYPES[5],
            Message::Motor(_) => MESSAGE_TYPES[6],
            Message::Target(_) => MESSAGE_TYPES[7],
            Message::Heartbeat(_) => MESSAGE_TYPES[8],
        }
    }

    /// Encode the message into a frame.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        serde_json::to_vec(self).map_err(FrameError::SerializationError)
    }

    /// Decode a message from a frame.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        // Parse into a generic value first so the failure modes can be told apart
        let val: Value = serde_json::from_slice(frame).map_err(|e| match e.classify() {
            Category::Eof => FrameError::Truncated,
            _ => FrameError::Malformed(e),
        })?;

        // Check the discriminant before looking at the payload
        let msg_type = match val.get("type").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => return Err(FrameError::MissingType),
        };

        if !MESSAGE_TYPES.contains(&msg_type.as_str()) {
            return Err(FrameError::UnknownType(msg_type));
        }

        serde_json::from_value(val).map_err(|e| FrameError::InvalidPayload(msg_type, e))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
