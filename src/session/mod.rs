mod controller;
mod events;
mod ws;

use crate::rooms::RoomId;

pub use controller::{JoinError, SessionController};
pub use events::{ClientEvent, ServerEvent};
pub use ws::room_ws;

/// Per-connection lifecycle.
///
/// `Disconnected` has no variant: a disconnected connection is simply absent
/// from the registry and every later event for its id is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Joining(RoomId),
    InRoom(RoomId),
}
