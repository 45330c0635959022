use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::SendMessage;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
pub type ConnId = u64;

/// Sending half of one client connection.
///
/// Messages pushed here are drained by the connection's writer task in order.
/// Once that task is gone every send fails.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    id: ConnId,
    tx: UnboundedSender<SendMessage>,
}

impl ConnHandle {
    /// Create a handle together with the receiver its writer task drains.
    pub fn channel() -> (Self, UnboundedReceiver<SendMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn send(&self, msg: SendMessage) -> Result<(), SendError<SendMessage>> {
        self.tx.send(msg)
    }
}

/// Room id -> connections currently in that room
#[derive(Default)]
pub struct ConnectionRegistry {
    pub(super) rooms: Mutex<HashMap<String, HashMap<ConnId, ConnHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Adding the same handle twice is a no-op.
    pub async fn add(&self, room_id: &str, handle: ConnHandle) {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(handle.id(), handle);
    }

    /// Remove a connection from a room, dropping the room once it is empty.
    pub async fn remove(&self, room_id: &str, conn_id: ConnId) {
        let mut rooms = self.rooms.lock().await;
        if let Some(conns) = rooms.get_mut(room_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                rooms.remove(room_id);
                debug!("Room {} has no connections left", room_id);
            }
        }
    }

    /// Number of connections in a room, 0 for unknown rooms.
    pub async fn count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).map_or(0, HashMap::len)
    }

    /// `(rooms, connections)` across the whole process
    pub async fn totals(&self) -> (usize, usize) {
        let rooms = self.rooms.lock().await;
        let conns = rooms.values().map(HashMap::len).sum();
        (rooms.len(), conns)
    }

    #[cfg(test)]
    pub(crate) async fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.lock().await.contains_key(room_id)
    }
}
