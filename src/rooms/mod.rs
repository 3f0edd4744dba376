mod directory;
mod messages;

use std::fmt;

use axum::{routing::get, Router};
use serde::Serialize;
use thiserror::Error;

use crate::AppState;

pub use directory::RoomDirectory;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{room_code}/messages", get(messages::room_messages))
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room code {0:?} has no usable characters")]
    InvalidRoomId(String),
}

/// A sanitized room identifier.
///
/// Only `[A-Za-z0-9-]` survive; everything else in the client supplied code
/// is stripped before the id is used as a key anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(room_code: &str) -> Result<RoomId, RoomError> {
        let clean: String = room_code
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();

        if clean.is_empty() {
            return Err(RoomError::InvalidRoomId(room_code.to_owned()));
        }

        Ok(RoomId(clean))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}
