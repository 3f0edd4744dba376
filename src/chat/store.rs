use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::{connections::ConnectionId, rooms::RoomId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("archived payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("archived connection id is corrupt: {0}")]
    Corrupt(#[from] uuid::Error),
}

/// An archived chat line. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub room_id: RoomId,
    pub sender: String,
    pub sender_connection_id: ConnectionId,
    pub payload: Value,
    /// Milliseconds since the Unix epoch, assigned by the archive.
    pub timestamp: i64,
}

/// A chat line before the archive has stamped it.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub sender: String,
    pub sender_connection_id: ConnectionId,
    pub payload: Value,
}

impl NewChatMessage {
    pub(crate) fn stamp(self, room_id: &RoomId, timestamp: i64) -> ChatMessage {
        ChatMessage {
            room_id: room_id.clone(),
            sender: self.sender,
            sender_connection_id: self.sender_connection_id,
            payload: self.payload,
            timestamp,
        }
    }
}

/// Durable per-room chat transcript.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, room_id: &RoomId, message: NewChatMessage) -> Result<ChatMessage, StoreError>;

    /// Every message of the room, oldest first.
    async fn query_ordered(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, StoreError>;
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Process-local archive. Transcripts vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    rooms: RwLock<HashMap<RoomId, Vec<ChatMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, room_id: &RoomId, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let message = message.stamp(room_id, now_millis());
        self.rooms
            .write()
            .await
            .entry(room_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn query_ordered(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
        let mut messages = self.rooms
            .read()
            .await
            .get(room_id)
            .cloned()
            .unwrap_or_default();
        // stable, so equal timestamps keep append order
        messages.sort_by_key(|message| message.timestamp);
        Ok(messages)
    }
}
