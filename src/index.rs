use axum::{debug_handler, extract::State, Json};
use serde::Serialize;

use crate::{session::SessionController, AppState};

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    connections: usize,
    rooms: usize,
}

#[debug_handler(state = AppState)]
pub async fn health(State(controller): State<SessionController>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connections: controller.connections().len(),
        rooms: controller.rooms().len(),
    })
}
