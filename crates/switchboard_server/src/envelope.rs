//! Wire envelope codec.
//!
//! Every message in either direction is a single JSON object of the form
//! `{"event": "<name>", "data": <payload>}`.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded `{event, data}` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, segmented by `.`, `_` or `-`
    pub event: String,

    /// Event payload
    pub data: Value,
}

/// Borrowed form used for outgoing messages so payloads need not be cloned.
#[derive(Serialize)]
struct OutgoingEnvelope<'a, T: ?Sized> {
    event: &'a str,
    data: &'a T,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parses a raw text frame.
    ///
    /// The frame must be a JSON object holding a string `event` and a
    /// non-null `data`; anything else is a [`ServerError::MalformedMessage`].
    pub fn parse(text: &str) -> Result<Self, ServerError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ServerError::MalformedMessage(format!("invalid JSON: {e}")))?;

        let Value::Object(mut map) = value else {
            return Err(ServerError::MalformedMessage(
                "Incoming message does not comply to expected format.".to_string(),
            ));
        };

        let event = match map.remove("event") {
            Some(Value::String(event)) => event,
            Some(_) => {
                return Err(ServerError::MalformedMessage(
                    "\"event\" must be a string".to_string(),
                ))
            }
            None => {
                return Err(ServerError::MalformedMessage(
                    "missing \"event\" key".to_string(),
                ))
            }
        };

        let data = match map.remove("data") {
            Some(Value::Null) | None => {
                return Err(ServerError::MalformedMessage(
                    "missing \"data\" key".to_string(),
                ))
            }
            Some(data) => data,
        };

        Ok(Self { event, data })
    }

    pub fn encode(&self) -> Result<String, ServerError> {
        encode(&self.event, &self.data)
    }
}

/// Serializes an outgoing `{event, data}` frame.
pub fn encode<T: Serialize + ?Sized>(event: &str, data: &T) -> Result<String, ServerError> {
    Ok(serde_json::to_string(&OutgoingEnvelope { event, data })?)
}
