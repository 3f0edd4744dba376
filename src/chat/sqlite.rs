use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::rooms::RoomId;

use super::store::{now_millis, ChatMessage, MessageStore, NewChatMessage, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id TEXT NOT NULL,
    sender TEXT NOT NULL,
    sender_connection_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_room_timestamp ON messages (room_id, timestamp, seq);
"#;

/// Chat archive in a sqlite `messages` table.
#[derive(Debug, Clone)]
pub struct SqliteMessageStore {
    db_pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Wraps `db_pool`, creating the schema if it is missing.
    pub async fn new(db_pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&db_pool).await?;
        Ok(Self { db_pool })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, room_id: &RoomId, message: NewChatMessage) -> Result<ChatMessage, StoreError> {
        let message = message.stamp(room_id, now_millis());

        sqlx::query("INSERT INTO messages (room_id,sender,sender_connection_id,payload,timestamp) VALUES (?,?,?,?,?)")
            .bind(room_id.as_str())
            .bind(&message.sender)
            .bind(message.sender_connection_id.to_string())
            .bind(serde_json::to_string(&message.payload)?)
            .bind(message.timestamp)
            .execute(&self.db_pool)
            .await?;

        Ok(message)
    }

    async fn query_ordered(&self, room_id: &RoomId) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            "SELECT sender,sender_connection_id,payload,timestamp FROM messages WHERE room_id=? ORDER BY timestamp ASC, seq ASC",
        )
        .bind(room_id.as_str())
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter()
            .map(|(sender, sender_connection_id, payload, timestamp)| {
                Ok(ChatMessage {
                    room_id: room_id.clone(),
                    sender,
                    sender_connection_id: Uuid::parse_str(&sender_connection_id)?,
                    payload: serde_json::from_str(&payload)?,
                    timestamp,
                })
            })
            .collect()
    }
}
