use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::{rooms::RoomId, session::{ServerEvent, SessionState}};

pub type ConnectionId = Uuid;

/// Bounded queue drained by a connection's socket writer.
pub type Outbox = mpsc::Sender<ServerEvent>;

#[derive(Debug)]
pub struct Connection {
    pub state: SessionState,
    pub connected_at: OffsetDateTime,
    pub joined_at: Option<OffsetDateTime>,
    outbox: Outbox,
}

/// Live connections keyed by id. Entries exist from connect until disconnect.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: ConnectionId, outbox: Outbox) {
        self.connections.insert(connection_id, Connection {
            state: SessionState::Connected,
            connected_at: OffsetDateTime::now_utc(),
            joined_at: None,
            outbox,
        });
    }

    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Connection> {
        self.connections
            .remove(&connection_id)
            .map(|(_, connection)| connection)
    }

    pub fn is_connected(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn state(&self, connection_id: ConnectionId) -> Option<SessionState> {
        self.connections
            .get(&connection_id)
            .map(|connection| connection.state.clone())
    }

    pub fn set_state(&self, connection_id: ConnectionId, state: SessionState) {
        if let Some(mut connection) = self.connections.get_mut(&connection_id) {
            connection.state = state;
        }
    }

    /// The room the connection currently sits in, if any.
    pub fn room(&self, connection_id: ConnectionId) -> Option<RoomId> {
        match self.state(connection_id)? {
            SessionState::InRoom(room_id) => Some(room_id),
            SessionState::Connected | SessionState::Joining(_) => None,
        }
    }

    pub fn set_room(&self, connection_id: ConnectionId, room_id: Option<RoomId>) {
        let Some(mut connection) = self.connections.get_mut(&connection_id) else {
            return;
        };

        match room_id {
            Some(room_id) => {
                connection.state = SessionState::InRoom(room_id);
                connection.joined_at = Some(OffsetDateTime::now_utc());
            }
            None => {
                connection.state = SessionState::Connected;
                connection.joined_at = None;
            }
        }
    }

    /// Queues `event` for the connection without waiting.
    ///
    /// Returns `false` if the connection is gone or its outbox is full; a
    /// peer that stops reading loses events instead of growing its queue.
    pub fn send(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let Some(connection) = self.connections.get(&connection_id) else {
            return false;
        };

        match connection.outbox.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::debug!(connection = %connection_id, ?event, "outbox full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
