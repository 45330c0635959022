use crate::{handlers, state::AppState, ws::handler::websocket_handler};
use axum::{routing::{get, post}, Router};
use std::sync::Arc;

/// Create the REST and WebSocket routes
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::<Arc<AppState>>::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/rooms", post(handlers::create_room))
        .route("/rooms/:room_id", get(handlers::get_room))
        .route("/autocomplete", post(handlers::autocomplete))
        .route("/ws/:room_id", get(websocket_handler))
        .route("/api/v1/diagnostics", get(handlers::diagnostics))
        .with_state(state)
}
