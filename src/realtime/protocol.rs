//! JSON messages exchanged over the push channel
use crate::core::TokenState;
use crate::engine::ensure_finite;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { token: String },
    Unsubscribe { token: String },
    Ping,
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome { subscriber: String },
    Subscribed { token: String },
    Unsubscribed { token: String },
    TokenUpdated { token: String, state: TokenState },
    Pong,
    Error { message: String },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { message: message.into() }
    }

    /// Token updates with non-finite numbers are refused instead of sent with nulls
    pub fn encode(&self) -> Result<String, EngineError> {
        if let ServerMessage::TokenUpdated { state, .. } = self {
            ensure_finite(state)?;
        }
        serde_json::to_string(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let msg = ClientMessage::parse(r#"{"type":"subscribe","token":"abc"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Subscribe { token: "abc".to_string() });
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
        assert!(ClientMessage::parse(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_server_message_tags() {
        let text = ServerMessage::Welcome { subscriber: "sub-1".to_string() }.encode().unwrap();
        assert_eq!(text, r#"{"type":"welcome","subscriber":"sub-1"}"#);
        assert_eq!(ServerMessage::Pong.encode().unwrap(), r#"{"type":"pong"}"#);
    }
}
