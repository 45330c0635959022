use futures_util::{pin_mut, Stream, StreamExt};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use super::registry::{ConnHandle, ConnId};
use crate::models::{
    CodeUpdateMessage, CursorUpdateMessage, InitMessage, PongMessage, PresenceMessage, ReceivedMessage, SendMessage,
};
use crate::services::room_service::{get_or_create_room, StoreError};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to resolve room '{room_id}': {source}")]
    Resolve {
        room_id: String,
        #[source]
        source: StoreError,
    },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Runs the leave sequence of a session exactly once.
///
/// `close` spawns it and waits for it. If the session future is dropped before
/// that (task aborted, panic unwinding) the sequence is spawned from `Drop` instead.
struct SessionGuard {
    inner: Option<(Arc<AppState>, String, ConnId)>,
}

impl SessionGuard {
    fn new(state: Arc<AppState>, room_id: String, conn_id: ConnId) -> Self {
        Self {
            inner: Some((state, room_id, conn_id)),
        }
    }

    async fn close(mut self) {
        if let Some((state, room_id, conn_id)) = self.inner.take() {
            // Once spawned, the sequence completes even if this session is cancelled.
            if let Err(e) = tokio::spawn(leave_room(state, room_id, conn_id)).await {
                error!("Leave sequence of connection {} failed: {}", conn_id, e);
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some((state, room_id, conn_id)) = self.inner.take() else {
            return;
        };
        match Handle::try_current() {
            Ok(runtime) => {
                warn!("Session {} in room {} ended abruptly, cleaning up", conn_id, room_id);
                runtime.spawn(leave_room(state, room_id, conn_id));
            }
            Err(_) => {
                error!("No runtime to clean up session {} in room {}", conn_id, room_id);
            }
        }
    }
}

/// Drive one client connection from join to leave.
///
/// `inbound` yields the client's text frames in order and ends when the peer
/// closes. Every message for the client, including replies, goes through `handle`.
pub async fn run_session<S>(
    state: Arc<AppState>,
    room_id: String,
    handle: ConnHandle,
    inbound: S,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<String, SessionError>> + Send,
{
    let language = loop {
        let seen_evictions = state.rooms.evictions();
        let room = get_or_create_room(state.store.as_ref(), &room_id, &state.config.default_language)
            .await
            .map_err(|source| {
                error!("Failed to load room {}: {}", room_id, source);
                SessionError::Resolve {
                    room_id: room_id.clone(),
                    source,
                }
            })?;

        match state.rooms.attach(&room_id, seen_evictions, &room.code, &room.language).await {
            Some((_, language)) => break language,
            None => debug!("Room state changed while loading room {}, reloading", room_id),
        }
    };
    let guard = SessionGuard::new(state.clone(), room_id.clone(), handle.id());
    state.registry.add(&room_id, handle.clone()).await;

    // Read after registering so no broadcast falls between init and the first update.
    let code = state.rooms.get(&room_id).await;
    if handle.send(SendMessage::Init(InitMessage { code, language })).is_err() {
        debug!("Connection {} closed before init", handle.id());
    }

    let users = state.registry.count(&room_id).await;
    info!("Connection {} joined room {} ({} users)", handle.id(), room_id, users);
    state
        .registry
        .broadcast(&room_id, &SendMessage::UserJoined(PresenceMessage { users }), Some(handle.id()))
        .await;

    pin_mut!(inbound);
    let outcome = loop {
        match inbound.next().await {
            Some(Ok(text)) => handle_message(&state, &room_id, &handle, &text).await,
            Some(Err(e)) => {
                error!("Connection {} in room {} failed: {}", handle.id(), room_id, e);
                break Err(e);
            }
            None => break Ok(()),
        }
    };

    guard.close().await;
    outcome
}

async fn handle_message(state: &AppState, room_id: &str, handle: &ConnHandle, text: &str) {
    let msg = match ReceivedMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Dropping malformed message in room {}: {}", room_id, e);
            return;
        }
    };

    match msg {
        ReceivedMessage::CodeUpdate(update) => handle_code_update(state, room_id, handle, update).await,
        ReceivedMessage::CursorUpdate(cursor) => handle_cursor_update(state, room_id, handle, cursor).await,
        ReceivedMessage::Ping(_) => handle_ping(room_id, handle),
        ReceivedMessage::Unknown => debug!("Ignoring message of unknown type in room {}", room_id),
    }
}

/// Apply an edit, arm the save timer and forward the text to the peers.
async fn handle_code_update(state: &AppState, room_id: &str, handle: &ConnHandle, update: CodeUpdateMessage) {
    debug!("Code update in room {} from {} ({} bytes)", room_id, handle.id(), update.code.len());
    state.rooms.update(room_id, &update.code).await;
    state.scheduler.schedule_save(room_id, state.on_save()).await;
    state
        .registry
        .broadcast(room_id, &SendMessage::CodeUpdate(update), Some(handle.id()))
        .await;
}

async fn handle_cursor_update(state: &AppState, room_id: &str, handle: &ConnHandle, cursor: CursorUpdateMessage) {
    state
        .registry
        .broadcast(room_id, &SendMessage::CursorUpdate(cursor), Some(handle.id()))
        .await;
}

fn handle_ping(room_id: &str, handle: &ConnHandle) {
    if handle.send(SendMessage::Pong(PongMessage {})).is_err() {
        debug!("Failed to send pong to {} in room {}", handle.id(), room_id);
    }
}

/// Flush, deregister and tell the remaining peers.
async fn leave_room(state: Arc<AppState>, room_id: String, conn_id: ConnId) {
    match state.scheduler.force_save(&room_id, state.on_save()).await {
        Ok(true) => info!("Room {} saved on disconnect of {}", room_id, conn_id),
        Ok(false) => {}
        Err(e) => warn!("Room {} left unsaved after disconnect of {}: {}", room_id, conn_id, e),
    }

    state.registry.remove(&room_id, conn_id).await;
    let users = state.registry.count(&room_id).await;
    state
        .registry
        .broadcast(&room_id, &SendMessage::UserLeft(PresenceMessage { users }), None)
        .await;
    if !state.rooms.detach(&room_id).await && users == 0 && state.rooms.is_dirty(&room_id).await {
        warn!("Room {} kept in memory with unsaved changes", room_id);
    }

    info!("Connection {} left room {} ({} users remaining)", conn_id, room_id, users);
}
