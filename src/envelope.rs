//! Wire envelope for the telemetry/command channel.
//!
//! Every frame on the wire is a UTF-8 JSON object carrying a mandatory `type`
//! discriminator. The payload shape depends on the tag:
//!
//! ```text
//! {"type":"ping","timestamp":1700000000000}
//! {"type":"servo_control","angle":181}
//! {"type":"iot_data","data":{"id":7,"temperature":22.5,...}}
//! ```
//!
//! Recognized tags decode into typed [`Envelope`] variants. Unrecognized tags
//! are kept as [`Envelope::Unknown`] with the raw JSON body so they can still be
//! dispatched to subscribers of that exact tag.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event-type tag used for dispatch.
///
/// A closed enumeration of the tags this crate understands, plus a catch-all
/// for anything else a newer server might send.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Client handshake.
    Hello,
    /// Server reply to the handshake.
    HelloResponse,
    /// Liveness check (either direction).
    Ping,
    /// Liveness reply (either direction).
    Pong,
    /// LED on/off command.
    LedControl,
    /// LED command acknowledgment.
    LedControlAck,
    /// Servo angle command.
    ServoControl,
    /// Servo command acknowledgment.
    ServoControlAck,
    /// Sensor telemetry broadcast.
    IotData,
    /// Server-reported error, also used locally for decode/transport faults.
    Error,
    /// Greeting sent once by the server on accept.
    Connection,
    /// Local-only connectivity notification. Never appears on the wire.
    Connected,
    /// Any other tag.
    Unknown(String),
}

impl Tag {
    /// Map a wire string onto a tag. Never fails.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "hello" => Self::Hello,
            "hello_response" => Self::HelloResponse,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "led_control" => Self::LedControl,
            "led_control_ack" => Self::LedControlAck,
            "servo_control" => Self::ServoControl,
            "servo_control_ack" => Self::ServoControlAck,
            "iot_data" => Self::IotData,
            "error" => Self::Error,
            "connection" => Self::Connection,
            "connected" => Self::Connected,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Wire spelling of the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hello => "hello",
            Self::HelloResponse => "hello_response",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::LedControl => "led_control",
            Self::LedControlAck => "led_control_ack",
            Self::ServoControl => "servo_control",
            Self::ServoControlAck => "servo_control_ack",
            Self::IotData => "iot_data",
            Self::Error => "error",
            Self::Connection => "connection",
            Self::Connected => "connected",
            Self::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// One sensor reading as broadcast by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Monotonic reading id assigned by the backend.
    pub id: i64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Barometric pressure, hPa.
    pub pressure: f64,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

/// A complete typed message exchanged over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Client handshake sent on every open.
    Hello {
        /// Client identifier.
        client: String,
        /// Epoch milliseconds.
        timestamp: i64,
    },
    /// Server reply to [`Envelope::Hello`].
    HelloResponse {
        /// Greeting text.
        message: String,
        /// Epoch milliseconds.
        timestamp: i64,
    },
    /// Liveness check.
    Ping {
        /// Sender's epoch milliseconds.
        timestamp: i64,
    },
    /// Liveness reply.
    Pong {
        /// Replier's epoch milliseconds.
        timestamp: i64,
        /// Timestamp echoed from the ping being answered.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_timestamp: Option<i64>,
    },
    /// Switch the LED (`state` is 0 or 1).
    LedControl {
        /// 1 = on, 0 = off.
        state: u8,
    },
    /// Acknowledgment of [`Envelope::LedControl`].
    LedControlAck {
        /// Whether the device applied the command.
        success: bool,
        /// Echoed LED state.
        #[serde(default)]
        state: Option<u8>,
    },
    /// Move the servo. Not clamped: 181 switches the device to auto mode.
    ServoControl {
        /// Target angle in degrees, or 181 for auto.
        angle: i32,
    },
    /// Acknowledgment of [`Envelope::ServoControl`].
    ServoControlAck {
        /// Whether the device applied the command.
        success: bool,
        /// Echoed angle.
        #[serde(default)]
        angle: Option<i32>,
    },
    /// Telemetry broadcast.
    IotData {
        /// The reading.
        data: Telemetry,
    },
    /// Server-side processing error.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// Greeting sent once when the server accepts a connection.
    Connection {
        /// Greeting text.
        message: String,
    },
    /// Frame with a tag this crate does not model.
    #[serde(skip)]
    Unknown {
        /// The `type` string as received.
        tag: String,
        /// Full JSON object, including `type`.
        body: serde_json::Value,
    },
}

impl Envelope {
    /// Dispatch tag of this envelope.
    ///
    /// Unknown envelopes always map to [`Tag::Unknown`], even when their wire
    /// tag collides with a local-only tag such as `connected`.
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Self::Hello { .. } => Tag::Hello,
            Self::HelloResponse { .. } => Tag::HelloResponse,
            Self::Ping { .. } => Tag::Ping,
            Self::Pong { .. } => Tag::Pong,
            Self::LedControl { .. } => Tag::LedControl,
            Self::LedControlAck { .. } => Tag::LedControlAck,
            Self::ServoControl { .. } => Tag::ServoControl,
            Self::ServoControlAck { .. } => Tag::ServoControlAck,
            Self::IotData { .. } => Tag::IotData,
            Self::Error { .. } => Tag::Error,
            Self::Connection { .. } => Tag::Connection,
            Self::Unknown { tag, .. } => Tag::Unknown(tag.clone()),
        }
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the frame is not JSON, not an object, has no
    /// string `type`, or carries a recognized tag with the wrong payload shape.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let tag = match &value {
            serde_json::Value::Object(map) => match map.get("type").and_then(|t| t.as_str()) {
                Some(tag) => tag.to_owned(),
                None => return Err(DecodeError::MissingType),
            },
            _ => return Err(DecodeError::NotAnObject),
        };

        match Tag::parse(&tag) {
            Tag::Unknown(_) | Tag::Connected => Ok(Self::Unknown { tag, body: value }),
            _ => serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
                tag,
                reason: e.to_string(),
            }),
        }
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; in practice only non-finite floats fail.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Unknown { body, .. } => serde_json::to_string(body),
            known => serde_json::to_string(known),
        }
    }

    /// Client handshake stamped with the current time.
    #[must_use]
    pub fn hello(client: impl Into<String>) -> Self {
        Self::Hello {
            client: client.into(),
            timestamp: now_millis(),
        }
    }

    /// Heartbeat ping stamped with the current time.
    #[must_use]
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: now_millis(),
        }
    }

    /// Reply to a ping carrying `client_timestamp`.
    #[must_use]
    pub fn pong_for(client_timestamp: i64) -> Self {
        Self::Pong {
            timestamp: now_millis(),
            client_timestamp: Some(client_timestamp),
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Reasons a text frame could not be decoded into an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    InvalidJson(String),
    /// The frame is JSON but not an object.
    NotAnObject,
    /// The object has no string `type` field.
    MissingType,
    /// A recognized tag with a payload of the wrong shape.
    Malformed {
        /// The tag as received.
        tag: String,
        /// Serde's explanation.
        reason: String,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "Invalid JSON frame: {msg}"),
            Self::NotAnObject => write!(f, "Frame is not a JSON object"),
            Self::MissingType => write!(f, "Frame has no string `type` field"),
            Self::Malformed { tag, reason } => write!(f, "Malformed `{tag}` frame: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}
