mod relay;
mod sqlite;
mod store;

pub use relay::ChatRelay;
pub use sqlite::SqliteMessageStore;
pub use store::{ChatMessage, MemoryMessageStore, MessageStore, NewChatMessage, StoreError};
