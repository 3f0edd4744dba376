use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{chat::ChatMessage, connections::ConnectionId, rooms::RoomId};

/// Client-to-server events
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinRoom {
        #[serde(default, deserialize_with = "string_or_none")]
        room_code: Option<String>,
    },
    Signal {
        to: ConnectionId,
        payload: Value,
    },
    ChatMessage {
        payload: Value,
        sender: String,
    },
}

/// Server-to-client events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    Connected { connection_id: ConnectionId },
    RoomJoined { room_id: RoomId },
    JoinError { reason: String },
    UserJoined { connection_id: ConnectionId, members: Vec<ConnectionId> },
    UserLeft { connection_id: ConnectionId },
    Signal { from: ConnectionId, payload: Value },
    ChatHistory { messages: Vec<ChatMessage> },
    ChatMessage { payload: Value, sender: String, sender_connection_id: ConnectionId },
}

// Non-string room codes are kept as "missing" so they surface as a join-error
// instead of an unparseable frame.
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(code) => Some(code),
        _ => None,
    })
}
