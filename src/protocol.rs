//! Wire protocol for the message relay.
//!
//! Events are JSON text frames tagged with an `event` field, using the
//! channel names the frontend expects: `sendMessage` (client → server),
//! `receiveMessage` and `errorMessage` (server → client).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted chat message as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned identifier
    pub id: i64,
    pub content: String,
    /// Id of the user who produced the message
    pub sender: i64,
    /// Server-assigned at persistence time
    pub timestamp: DateTime<Utc>,
}

/// Events sent by the client over the relay connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Submit a message for persistence and echo
    SendMessage { content: String, sender: i64 },
}

/// Events sent by the gateway back to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// The persisted copy of a submitted message
    ReceiveMessage {
        #[serde(flatten)]
        message: ChatMessage,
    },
    /// A per-message relay failure
    ErrorMessage { error: String },
}
