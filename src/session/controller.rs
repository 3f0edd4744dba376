use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    chat::{ChatRelay, MessageStore},
    connections::{ConnectionId, ConnectionRegistry, Outbox},
    rooms::{RoomDirectory, RoomError, RoomId},
    signal::{SignalEnvelope, SignalRelay},
};

use super::{ClientEvent, ServerEvent, SessionState};

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("Invalid room code")]
    InvalidInput,

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("connection {0} is not connected")]
    NotConnected(ConnectionId),
}

/// Drives every connection through connect, join, chat/signal and disconnect.
///
/// Cheap to clone; all clones share the same registry and directory. Each
/// connection must feed its events from a single task so they are handled
/// in arrival order.
#[derive(Clone)]
pub struct SessionController {
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
    signals: SignalRelay,
    chat: ChatRelay,
}

impl SessionController {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomDirectory::new());

        Self {
            signals: SignalRelay::new(connections.clone()),
            chat: ChatRelay::new(store, rooms.clone(), connections.clone()),
            connections,
            rooms,
        }
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    pub fn chat(&self) -> &ChatRelay {
        &self.chat
    }

    /// Registers the connection and tells it its own id.
    pub fn connect(&self, connection_id: ConnectionId, outbox: Outbox) {
        self.connections.register(connection_id, outbox);
        self.connections.send(connection_id, ServerEvent::Connected { connection_id });
        tracing::info!(connection = %connection_id, "connected");
    }

    pub async fn handle(&self, connection_id: ConnectionId, event: ClientEvent) {
        if !self.connections.is_connected(connection_id) {
            tracing::debug!(connection = %connection_id, ?event, "event after disconnect dropped");
            return;
        }

        match event {
            ClientEvent::JoinRoom { room_code } => {
                let _ = self.join_room(connection_id, room_code.as_deref()).await;
            }
            ClientEvent::Signal { to, payload } => self.signal(connection_id, to, payload),
            ClientEvent::ChatMessage { payload, sender } => {
                self.chat_message(connection_id, payload, sender).await;
            }
        }
    }

    /// Moves the connection into the room named by `room_code`.
    ///
    /// Failures are reported to the requester as `join-error` and leave it in
    /// whatever room it was in before.
    pub async fn join_room(
        &self,
        connection_id: ConnectionId,
        room_code: Option<&str>,
    ) -> Result<RoomId, JoinError> {
        let Some(previous) = self.connections.state(connection_id) else {
            return Err(JoinError::NotConnected(connection_id));
        };

        let room_id = match room_code.filter(|code| !code.is_empty()) {
            Some(code) => RoomId::parse(code).map_err(JoinError::from),
            None => Err(JoinError::InvalidInput),
        };
        let room_id = match room_id {
            Ok(room_id) => room_id,
            Err(error) => {
                tracing::info!(connection = %connection_id, ?room_code, %error, "join rejected");
                self.connections.send(connection_id, ServerEvent::JoinError { reason: error.to_string() });
                return Err(error);
            }
        };

        if let SessionState::InRoom(current) = previous {
            self.leave_room(connection_id, &current);
        }
        self.connections.set_state(connection_id, SessionState::Joining(room_id.clone()));

        // Announced under the room lock so a concurrent joiner's user-joined
        // cannot reach this connection ahead of its own room-joined.
        let members = self.rooms.join_with(&room_id, connection_id, |members| {
            self.connections.set_room(connection_id, Some(room_id.clone()));
            self.connections.send(connection_id, ServerEvent::RoomJoined { room_id: room_id.clone() });
            for member in members {
                self.connections.send(*member, ServerEvent::UserJoined {
                    connection_id,
                    members: members.to_vec(),
                });
            }
        });
        tracing::info!(connection = %connection_id, room = %room_id, members = members.len(), "joined room");

        match self.chat.history(&room_id).await {
            Ok(messages) => {
                self.connections.send(connection_id, ServerEvent::ChatHistory { messages });
            }
            Err(error) => {
                tracing::warn!(connection = %connection_id, room = %room_id, %error, "chat history unavailable");
            }
        }

        Ok(room_id)
    }

    pub fn signal(&self, from: ConnectionId, to: ConnectionId, payload: Value) {
        if let Err(error) = self.signals.relay(SignalEnvelope { from, to, payload }) {
            tracing::debug!(connection = %from, %error, "signal dropped");
        }
    }

    pub async fn chat_message(&self, connection_id: ConnectionId, payload: Value, sender: String) {
        let Some(room_id) = self.connections.room(connection_id) else {
            tracing::debug!(connection = %connection_id, "chat outside of a room ignored");
            return;
        };

        self.chat.post_message(&room_id, sender, connection_id, payload).await;
    }

    /// Terminal: removes the connection everywhere and tells its room.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let room_id = self.connections.room(connection_id);
        if let Some(room_id) = &room_id {
            self.rooms.leave(room_id, connection_id);
        }

        let Some(connection) = self.connections.unregister(connection_id) else {
            return;
        };

        if let Some(room_id) = &room_id {
            self.announce_departure(room_id, connection_id);
        }

        let now = OffsetDateTime::now_utc();
        tracing::info!(
            connection = %connection_id,
            room = ?room_id.as_ref().map(RoomId::as_str),
            online_secs = (now - connection.connected_at).whole_seconds(),
            in_room_secs = connection.joined_at.map(|joined_at| (now - joined_at).whole_seconds()),
            "disconnected"
        );
    }

    fn leave_room(&self, connection_id: ConnectionId, room_id: &RoomId) {
        self.rooms.leave(room_id, connection_id);
        self.connections.set_room(connection_id, None);
        self.announce_departure(room_id, connection_id);
        tracing::info!(connection = %connection_id, room = %room_id, "left room");
    }

    fn announce_departure(&self, room_id: &RoomId, connection_id: ConnectionId) {
        for member in self.rooms.members(room_id) {
            self.connections.send(member, ServerEvent::UserLeft { connection_id });
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc::{self, Receiver};
    use uuid::Uuid;

    use crate::chat::{ChatMessage, MemoryMessageStore, NewChatMessage, StoreError};

    use super::*;

    struct OfflineStore;

    #[async_trait]
    impl MessageStore for OfflineStore {
        async fn append(&self, _: &RoomId, _: NewChatMessage) -> Result<ChatMessage, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }

        async fn query_ordered(&self, _: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolClosed))
        }
    }

    fn controller() -> (SessionController, Arc<MemoryMessageStore>) {
        let store = Arc::new(MemoryMessageStore::new());
        (SessionController::new(store.clone()), store)
    }

    fn connect(controller: &SessionController) -> (ConnectionId, Receiver<ServerEvent>) {
        let id = Uuid::now_v7();
        let (tx, mut rx) = mpsc::channel(64);
        controller.connect(id, tx);
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Connected { connection_id: id });
        (id, rx)
    }

    fn drain(rx: &mut Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn room(code: &str) -> RoomId {
        RoomId::parse(code).unwrap()
    }

    fn join(code: &str) -> ClientEvent {
        ClientEvent::JoinRoom { room_code: Some(code.to_owned()) }
    }

    #[tokio::test]
    async fn two_peers_meet_in_a_room() {
        let (controller, _) = controller();
        let (a, mut a_rx) = connect(&controller);
        let (b, mut b_rx) = connect(&controller);

        controller.handle(a, join("room1")).await;
        assert_eq!(drain(&mut a_rx), vec![
            ServerEvent::RoomJoined { room_id: room("room1") },
            ServerEvent::UserJoined { connection_id: a, members: vec![a] },
            ServerEvent::ChatHistory { messages: vec![] },
        ]);

        controller.handle(b, join("room1")).await;
        assert_eq!(drain(&mut a_rx), vec![
            ServerEvent::UserJoined { connection_id: b, members: vec![a, b] },
        ]);
        assert_eq!(drain(&mut b_rx), vec![
            ServerEvent::RoomJoined { room_id: room("room1") },
            ServerEvent::UserJoined { connection_id: b, members: vec![a, b] },
            ServerEvent::ChatHistory { messages: vec![] },
        ]);
        assert_eq!(controller.connections().room(b), Some(room("room1")));
    }

    #[tokio::test]
    async fn joins_the_sanitized_room() {
        let (controller, _) = controller();
        let (a, mut a_rx) = connect(&controller);

        let joined = controller.join_room(a, Some("abc#$%-123")).await.unwrap();
        assert_eq!(joined.as_str(), "abc-123");
        assert_eq!(drain(&mut a_rx)[0], ServerEvent::RoomJoined { room_id: room("abc-123") });
        assert_eq!(controller.rooms().members(&room("abc-123")), vec![a]);
    }

    #[tokio::test]
    async fn bad_room_codes_only_bother_the_requester() {
        let (controller, _) = controller();
        let (a, mut a_rx) = connect(&controller);
        let (b, mut b_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;
        controller.handle(b, join("room1")).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        for code in [None, Some(""), Some("#$%")] {
            controller.handle(a, ClientEvent::JoinRoom { room_code: code.map(str::to_owned) }).await;
            let events = drain(&mut a_rx);
            assert_eq!(events.len(), 1);
            assert!(matches!(events[0], ServerEvent::JoinError { .. }));
        }

        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(controller.connections().room(a), Some(room("room1")));
        assert_eq!(controller.rooms().members(&room("room1")), vec![a, b]);
    }

    #[tokio::test]
    async fn missing_room_code_reason_is_readable() {
        let (controller, _) = controller();
        let (a, mut a_rx) = connect(&controller);

        assert!(matches!(controller.join_room(a, None).await, Err(JoinError::InvalidInput)));
        assert_eq!(drain(&mut a_rx), vec![
            ServerEvent::JoinError { reason: "Invalid room code".to_owned() },
        ]);
        assert_eq!(controller.connections().state(a), Some(SessionState::Connected));
    }

    #[tokio::test]
    async fn switching_rooms_leaves_the_old_one_first() {
        let (controller, _) = controller();
        let (a, mut a_rx) = connect(&controller);
        let (b, mut b_rx) = connect(&controller);
        let (c, mut c_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;
        controller.handle(b, join("room1")).await;
        controller.handle(c, join("room2")).await;
        drain(&mut a_rx);
        drain(&mut b_rx);
        drain(&mut c_rx);

        controller.handle(a, join("room2")).await;

        assert_eq!(drain(&mut b_rx), vec![ServerEvent::UserLeft { connection_id: a }]);
        assert_eq!(drain(&mut c_rx), vec![
            ServerEvent::UserJoined { connection_id: a, members: vec![c, a] },
        ]);
        assert_eq!(controller.rooms().members(&room("room1")), vec![b]);
        assert_eq!(controller.rooms().members(&room("room2")), vec![c, a]);
        assert_eq!(controller.connections().room(a), Some(room("room2")));
    }

    #[tokio::test]
    async fn switching_away_as_last_member_drops_the_room() {
        let (controller, _) = controller();
        let (a, _a_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;
        controller.handle(a, join("room2")).await;

        assert!(!controller.rooms().contains(&room("room1")));
        assert_eq!(controller.rooms().len(), 1);
    }

    #[tokio::test]
    async fn history_goes_to_the_joiner_only() {
        let (controller, store) = controller();
        let earlier = Uuid::now_v7();
        for text in ["first", "second"] {
            store.append(&room("room1"), NewChatMessage {
                sender: "Zed".to_owned(),
                sender_connection_id: earlier,
                payload: json!(text),
            }).await.unwrap();
        }

        let (a, mut a_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;
        let history = match drain(&mut a_rx).pop() {
            Some(ServerEvent::ChatHistory { messages }) => messages,
            other => panic!("expected chat history, got {other:?}"),
        };
        assert_eq!(history, store.query_ordered(&room("room1")).await.unwrap());
        assert_eq!(history[0].payload, json!("first"));

        let (b, _b_rx) = connect(&controller);
        controller.handle(b, join("room1")).await;
        let a_events = drain(&mut a_rx);
        assert!(a_events.iter().all(|e| !matches!(e, ServerEvent::ChatHistory { .. })));
    }

    #[tokio::test]
    async fn signal_reaches_a_peer_outside_any_room() {
        let (controller, _) = controller();
        let (a, _a_rx) = connect(&controller);
        let (b, mut b_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;

        controller.handle(b, ClientEvent::Signal { to: a, payload: json!({"ice": "x"}) }).await;
        controller.handle(a, ClientEvent::Signal { to: b, payload: json!({"sdp": "offer-data"}) }).await;

        assert_eq!(drain(&mut b_rx), vec![
            ServerEvent::Signal { from: a, payload: json!({"sdp": "offer-data"}) },
        ]);
    }

    #[tokio::test]
    async fn signal_to_a_stranger_is_dropped() {
        let (controller, _) = controller();
        let (a, mut a_rx) = connect(&controller);

        controller.handle(a, ClientEvent::Signal { to: Uuid::now_v7(), payload: json!({}) }).await;
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn chat_is_echoed_and_archived() {
        let (controller, store) = controller();
        let (a, mut a_rx) = connect(&controller);
        let (b, mut b_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;
        controller.handle(b, join("room1")).await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        controller.handle(a, ClientEvent::ChatMessage { payload: json!("hello"), sender: "Alice".to_owned() }).await;

        let expected = ServerEvent::ChatMessage {
            payload: json!("hello"),
            sender: "Alice".to_owned(),
            sender_connection_id: a,
        };
        assert_eq!(drain(&mut a_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut b_rx), vec![expected]);
        assert_eq!(store.query_ordered(&room("room1")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn chat_outside_a_room_goes_nowhere() {
        let (controller, store) = controller();
        let (a, mut a_rx) = connect(&controller);

        controller.handle(a, ClientEvent::ChatMessage { payload: json!("anyone?"), sender: "Alice".to_owned() }).await;
        assert!(drain(&mut a_rx).is_empty());
        assert!(store.query_ordered(&room("room1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disconnect_tells_the_rest_of_the_room() {
        let (controller, _) = controller();
        let (a, _a_rx) = connect(&controller);
        let (b, mut b_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;
        controller.handle(b, join("room1")).await;
        drain(&mut b_rx);

        controller.disconnect(a);

        assert_eq!(drain(&mut b_rx), vec![ServerEvent::UserLeft { connection_id: a }]);
        assert_eq!(controller.rooms().members(&room("room1")), vec![b]);
        assert!(!controller.connections().is_connected(a));
    }

    #[tokio::test]
    async fn sole_member_disconnect_removes_the_room() {
        let (controller, _) = controller();
        let (a, _a_rx) = connect(&controller);
        controller.handle(a, join("room1")).await;

        controller.disconnect(a);

        assert!(!controller.rooms().contains(&room("room1")));
        assert!(controller.rooms().is_empty());
        assert!(controller.connections().is_empty());
    }

    #[tokio::test]
    async fn disconnected_is_terminal() {
        let (controller, _) = controller();
        let (a, _a_rx) = connect(&controller);
        controller.disconnect(a);

        controller.handle(a, join("room1")).await;
        assert!(controller.rooms().is_empty());
        assert!(matches!(
            controller.join_room(a, Some("room1")).await,
            Err(JoinError::NotConnected(id)) if id == a
        ));

        // a second disconnect is harmless
        controller.disconnect(a);
    }

    #[tokio::test]
    async fn unreadable_history_does_not_block_the_join() {
        let controller = SessionController::new(Arc::new(OfflineStore));
        let (a, mut a_rx) = connect(&controller);

        assert_eq!(controller.join_room(a, Some("room1")).await.unwrap(), room("room1"));
        assert_eq!(drain(&mut a_rx), vec![
            ServerEvent::RoomJoined { room_id: room("room1") },
            ServerEvent::UserJoined { connection_id: a, members: vec![a] },
        ]);
        assert_eq!(controller.connections().state(a), Some(SessionState::InRoom(room("room1"))));
        assert_eq!(controller.rooms().members(&room("room1")), vec![a]);
    }

    #[tokio::test]
    async fn peer_that_never_reads_stays_bounded() {
        let (controller, _) = controller();
        let (a, _a_rx) = connect(&controller);
        let b = Uuid::now_v7();
        let (tx, mut b_rx) = mpsc::channel(8);
        controller.connect(b, tx);

        for _ in 0..10_000 {
            controller.signal(a, b, json!({"sdp": "x".repeat(64)}));
        }

        let queued = drain(&mut b_rx);
        assert_eq!(queued.len(), 8);
        assert_eq!(queued[0], ServerEvent::Connected { connection_id: b });

        // once drained it hears signals again
        controller.signal(a, b, json!({"sdp": "again"}));
        assert_eq!(drain(&mut b_rx), vec![
            ServerEvent::Signal { from: a, payload: json!({"sdp": "again"}) },
        ]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn room_joined_comes_before_any_user_joined() {
        for _ in 0..50 {
            let (controller, _) = controller();
            let peers: Vec<_> = (0..8).map(|_| connect(&controller)).collect();

            let joins: Vec<_> = peers
                .iter()
                .map(|(id, _)| {
                    let (controller, id) = (controller.clone(), *id);
                    tokio::spawn(async move { controller.handle(id, join("room1")).await })
                })
                .collect();
            for task in joins {
                task.await.unwrap();
            }

            for (id, mut rx) in peers {
                let events = drain(&mut rx);
                assert_eq!(events[0], ServerEvent::RoomJoined { room_id: room("room1") });
                let own = events
                    .iter()
                    .position(|e| matches!(e, ServerEvent::UserJoined { connection_id, .. } if *connection_id == id))
                    .unwrap();
                // everyone announced before this peer is already in its member list
                if let ServerEvent::UserJoined { members, .. } = &events[own] {
                    assert_eq!(members.last(), Some(&id));
                }
            }
        }
    }
}
