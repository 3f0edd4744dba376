use axum::{debug_handler, extract::{Path, State}, Json};

use crate::{chat::ChatMessage, session::SessionController, AppResult, AppState};

use super::RoomId;

/// Full transcript of a room, oldest first.
#[debug_handler(state = AppState)]
pub(crate) async fn room_messages(
    Path(room_code): Path<String>,
    State(controller): State<SessionController>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let room_id = RoomId::parse(&room_code)?;
    let messages = controller.chat().history(&room_id).await?;

    Ok(Json(messages))
}
