//! JSON text frames exchanged with chat clients.
//!
//! ```text
//! client → server  {"type":"authorization","token":"..."}
//!                  {"type":"message","message":"..."}
//! server → client  {"type":"error","payload":{"code":401,"message":"Unauthorized"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::gateway::error::GatewayError;

/// Frame sent by a chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of a session, carrying an access token.
    Authorization {
        /// Access token; missing is treated as empty.
        #[serde(default)]
        token: String,
    },
    /// Chat line to publish.
    Message {
        /// Text broadcast to every session on the channel.
        message: String,
    },
}

impl ClientFrame {
    /// Parses one text frame.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| GatewayError::protocol(format!("bad frame: {e}")))
    }

    /// Value of the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientFrame::Authorization { .. } => "authorization",
            ClientFrame::Message { .. } => "message",
        }
    }
}

/// Frame sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Error report; the connection is closed after it.
    Error {
        /// HTTP-like status code.
        code: u16,
        /// Human readable reason.
        message: String,
    },
}

impl ServerFrame {
    /// The frame sent before dropping a client whose token was rejected.
    pub fn unauthorized() -> Self {
        ServerFrame::Error {
            code: 401,
            message: "Unauthorized".to_string(),
        }
    }

    /// Serialises the frame as JSON text.
    pub fn to_text(&self) -> Result<String, GatewayError> {
        serde_json::to_string(self).map_err(|e| GatewayError::protocol(format!("encode: {e}")))
    }
}
