//! Wire Protocol Types
//!
//! JSON text frames exchanged over the live socket:
//!
//! - client → server: `{"action": "subscribe" | "unsubscribe", "topic": "..."}`
//! - server → client: `{"topic": "...", "data": {...}}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Control frame verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
}

/// Subscribe/unsubscribe instruction sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    pub action: Action,
    pub topic: String,
}

impl ControlFrame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            action: Action::Subscribe,
            topic: topic.into(),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            action: Action::Unsubscribe,
            topic: topic.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Topic-tagged payload sent FROM the server TO the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub topic: String,
    /// Absent `data` is delivered as `null`.
    #[serde(default)]
    pub data: Value,
}

impl DataFrame {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse an inbound data frame.
pub fn parse_data_frame(text: &str) -> Result<DataFrame, ProtocolError> {
    let frame: DataFrame = serde_json::from_str(text)?;
    if frame.topic.is_empty() {
        return Err(ProtocolError::EmptyTopic);
    }
    Ok(frame)
}

/// Parse a control frame (server side of the socket).
pub fn parse_control_frame(text: &str) -> Result<ControlFrame, ProtocolError> {
    let frame: ControlFrame = serde_json::from_str(text)?;
    if frame.topic.is_empty() {
        return Err(ProtocolError::EmptyTopic);
    }
    Ok(frame)
}
