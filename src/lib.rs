pub mod chat;
pub mod config;
pub mod connections;
pub mod index;
pub mod rooms;
pub mod session;
pub mod signal;

use std::sync::Arc;

use axum::{extract::FromRef, http::{Method, StatusCode}, response::{IntoResponse, Response}, routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use chat::MessageStore;
use config::Config;
use session::SessionController;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub controller: SessionController,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        Self {
            controller: SessionController::new(store),
            config: Arc::new(config),
        }
    }
}

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(session::room_ws))
        .route("/health", get(index::health))
        .nest("/rooms", rooms::router())
        .with_state(app_state)
        .layer(cors)
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(error = %self.error, "request failed");
        }
        (self.status, self.error.to_string()).into_response()
    }
}

macro_rules! apperr_impl {
    ($E:ty, $status:expr) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self { status: $status, error: anyhow::Error::from(err) }
            }
        }
    };
}

apperr_impl!(rooms::RoomError, StatusCode::BAD_REQUEST);
apperr_impl!(chat::StoreError, StatusCode::SERVICE_UNAVAILABLE);
