use std::sync::Arc;
use axum::{
    extract::{Path, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    response::Response,
};
use futures_util::{future, SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use super::registry::ConnHandle;
use super::session::{run_session, SessionError};
use crate::state::AppState;

/// WebSocket handler
pub async fn websocket_handler(
    Path(room_id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("New WebSocket connection attempt for room {}", room_id);
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: String, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();
    let (handle, mut outbox) = ConnHandle::channel();
    let conn_id = handle.id();
    info!("WebSocket connection {} established for room {}", conn_id, room_id);

    // Writer: everything for this client goes through the handle, in order.
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize message for connection {}: {}", conn_id, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("Connection {} is gone, writer stopping", conn_id);
                return;
            }
        }
        // All handles dropped: the session is over.
        let _ = sender.close().await;
    });

    // Text frames only; a close frame ends the stream.
    let inbound = receiver
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(_) => None,
                Err(e) => Some(Err(SessionError::Transport(e.to_string()))),
            }
        });

    match run_session(state, room_id.clone(), handle, inbound).await {
        Ok(()) => {}
        Err(SessionError::Resolve { .. }) => warn!("Closing connection {}: room {} unavailable", conn_id, room_id),
        Err(e) => warn!("Connection {} in room {} ended with error: {}", conn_id, room_id, e),
    }

    if writer.await.is_err() {
        error!("Writer of connection {} panicked", conn_id);
    }
    info!("WebSocket connection {} terminated", conn_id);
}
