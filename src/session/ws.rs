use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{config::Config, AppState};

use super::{ClientEvent, SessionController};

#[debug_handler(state = AppState)]
pub async fn room_ws(
    State(controller): State<SessionController>,
    State(config): State<Arc<Config>>,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let outbox_capacity = config.outbox_capacity;
    ws.max_message_size(config.max_message_bytes)
        .on_upgrade(move |socket| serve_connection(controller, socket, outbox_capacity))
}

async fn serve_connection(controller: SessionController, socket: WebSocket, outbox_capacity: usize) {
    let connection_id = Uuid::now_v7();
    let (tx, mut rx) = mpsc::channel(outbox_capacity);
    let (mut sender, mut receiver) = socket.split();

    controller.connect(connection_id, tx);

    let mut outbound_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(error) => {
                    tracing::error!(connection = %connection_id, %error, "outbound event not serializable");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                    Ok(event) => controller.handle(connection_id, event).await,
                    Err(error) => {
                        tracing::debug!(connection = %connection_id, %error, "unparseable frame ignored");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(error)) => {
                    tracing::debug!(connection = %connection_id, %error, "socket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = &mut outbound_task => break,
        }
    }

    controller.disconnect(connection_id);
    outbound_task.abort();
}
