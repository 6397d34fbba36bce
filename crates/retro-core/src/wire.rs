//! Wire contract with the room service.
//!
//! Commands are POSTed as JSON to `{base}/command`; the server pushes frames
//! over an SSE stream whose URL is returned by the `hello` handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SessionError;

/// Response body the server sends when it no longer recognizes the client.
pub const UNKNOWN_CLIENT_BODY: &str = "Unknown client\n";

/// Event name of the liveness frame.
pub const KEEP_ALIVE_EVENT: &str = "keep-alive";

/// A command sent over the request/response channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Handshake establishing a session and returning the events URL.
    Hello,
    /// Opaque application payload delivered within the current session.
    Data(Value),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Data(_) => "data",
        }
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Hello => None,
            Self::Data(payload) => Some(payload),
        }
    }
}

/// JSON body of a command request. Borrowed so the secret is only
/// materialized while the body is being serialized.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCommand<'a> {
    pub name: &'static str,
    pub client_id: &'a str,
    pub secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<&'a Value>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloResponse {
    pub events_url: String,
}

impl HelloResponse {
    pub fn from_value(value: Value) -> Result<Self, SessionError> {
        serde_json::from_value(value)
            .map_err(|e| SessionError::Decode(format!("invalid hello response: {e}")))
    }
}

/// A server-pushed message forwarded verbatim to listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// A decoded frame from the event stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamFrame {
    KeepAlive,
    Message(InboundMessage),
}

impl StreamFrame {
    /// Decode the JSON carried in an SSE `data` field.
    pub fn parse(data: &str) -> Result<Self, SessionError> {
        let message: InboundMessage = serde_json::from_str(data)
            .map_err(|e| SessionError::Decode(format!("invalid stream frame: {e}")))?;
        if message.event == KEEP_ALIVE_EVENT {
            Ok(Self::KeepAlive)
        } else {
            Ok(Self::Message(message))
        }
    }

    pub fn message(event: impl Into<String>, payload: Value) -> Self {
        Self::Message(InboundMessage {
            event: event.into(),
            payload,
        })
    }
}
