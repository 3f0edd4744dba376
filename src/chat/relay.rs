use std::sync::Arc;

use serde_json::Value;

use crate::{
    connections::{ConnectionId, ConnectionRegistry},
    rooms::{RoomDirectory, RoomId},
    session::ServerEvent,
};

use super::store::{ChatMessage, MessageStore, NewChatMessage, StoreError};

/// Room-wide chat fan-out backed by the archive.
#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<dyn MessageStore>,
    rooms: Arc<RoomDirectory>,
    connections: Arc<ConnectionRegistry>,
}

impl ChatRelay {
    pub fn new(
        store: Arc<dyn MessageStore>,
        rooms: Arc<RoomDirectory>,
        connections: Arc<ConnectionRegistry>,
    ) -> Self {
        Self { store, rooms, connections }
    }

    /// Archives the message, then delivers it to every member of the room,
    /// sender included.
    ///
    /// A failed archive write is logged and the message is delivered anyway.
    /// Returns the number of members it was queued for.
    pub async fn post_message(
        &self,
        room_id: &RoomId,
        sender: String,
        sender_connection_id: ConnectionId,
        payload: Value,
    ) -> usize {
        let message = NewChatMessage {
            sender: sender.clone(),
            sender_connection_id,
            payload: payload.clone(),
        };

        if let Err(error) = self.store.append(room_id, message).await {
            tracing::warn!(room = %room_id, connection = %sender_connection_id, %error, "chat message not archived");
        }

        let event = ServerEvent::ChatMessage { payload, sender, sender_connection_id };
        self.rooms
            .members(room_id)
            .into_iter()
            .filter(|member| self.connections.send(*member, event.clone()))
            .count()
    }

    pub async fn history(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
        self.store.query_ordered(room_id).await
    }
}
