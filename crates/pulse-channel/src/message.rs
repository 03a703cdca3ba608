use chrono::{DateTime, Utc};
use pulse_core::MessageKind;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::ChannelError;

/// One cross-tab message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,

    #[serde(rename = "data", default)]
    pub payload: serde_json::Value,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    /// Stamp a message with the current time.
    #[must_use]
    pub fn new(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to the JSON frame sent between tabs.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Encode` if the payload cannot be serialized.
    pub fn encode(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Encode(e.to_string()))
    }

    /// Parse a JSON frame received from a sibling tab.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Decode` for malformed frames or unknown kinds.
    pub fn decode(frame: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(frame).map_err(|e| ChannelError::Decode(e.to_string()))
    }

    /// Interpret `data` as a typed payload.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Payload` when `data` does not match `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ChannelError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| ChannelError::Payload(e.to_string()))
    }
}
