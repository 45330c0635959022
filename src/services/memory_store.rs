use chrono::Utc;
use std::collections::HashMap;
use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::room_service::{RoomRecord, RoomStore, StoreError, StoreFuture, DEFAULT_CODE};

/// In-process room storage, used when no database is configured.
///
/// In tests it also keeps a log of every text write and can be switched into
/// a failing mode to simulate an unreachable backend.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: Mutex<HashMap<String, RoomRecord>>,
    #[cfg(test)]
    writes: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every successful `(room_id, text)` write, oldest first.
    #[cfg(test)]
    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Successful writes for one room.
    #[cfg(test)]
    pub fn writes_for(&self, room_id: &str) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|(id, _)| id == room_id)
            .map(|(_, text)| text)
            .collect()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    #[cfg(test)]
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is switched off".to_string()));
        }
        Ok(())
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".to_string())
    }

    fn fetch_now(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
        self.check_available()?;
        let rooms = self.rooms.lock().map_err(|_| Self::poisoned())?;
        Ok(rooms.get(room_id).cloned())
    }

    fn create_now(&self, room_id: Option<&str>, language: &str) -> Result<RoomRecord, StoreError> {
        self.check_available()?;
        let id = room_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let mut rooms = self.rooms.lock().map_err(|_| Self::poisoned())?;
        let room = rooms
            .entry(id.clone())
            .or_insert_with(|| RoomRecord {
                id,
                code: DEFAULT_CODE.to_string(),
                language: language.to_string(),
                created_at: now,
                updated_at: now,
            })
            .clone();
        debug!("Created room {} in memory", room.id);
        Ok(room)
    }

    fn write_now(&self, room_id: &str, text: &str) -> Result<(), StoreError> {
        self.check_available()?;
        {
            let mut rooms = self.rooms.lock().map_err(|_| Self::poisoned())?;
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| StoreError::NotFound(room_id.to_string()))?;
            room.code = text.to_string();
            room.updated_at = Utc::now();
        }
        debug!("Wrote {} bytes to room {} in memory", text.len(), room_id);
        #[cfg(test)]
        self.writes
            .lock()
            .map_err(|_| Self::poisoned())?
            .push((room_id.to_string(), text.to_string()));
        Ok(())
    }
}

impl RoomStore for MemoryRoomStore {
    fn fetch_room<'a>(&'a self, room_id: &'a str) -> StoreFuture<'a, Option<RoomRecord>> {
        Box::pin(ready(self.fetch_now(room_id)))
    }

    fn create_room<'a>(&'a self, room_id: Option<&'a str>, language: &'a str) -> StoreFuture<'a, RoomRecord> {
        Box::pin(ready(self.create_now(room_id, language)))
    }

    fn write_room_text<'a>(&'a self, room_id: &'a str, text: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(ready(self.write_now(room_id, text)))
    }
}

/// Memory store that can hold one fetch or one write at a gate, so tests can
/// interleave other work with a store call that is in flight.
#[cfg(test)]
pub(crate) struct GatedRoomStore {
    pub inner: MemoryRoomStore,
    hold_fetch: AtomicBool,
    hold_write: AtomicBool,
    reached: tokio::sync::Notify,
    gate: tokio::sync::Notify,
}

#[cfg(test)]
impl GatedRoomStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryRoomStore::new(),
            hold_fetch: AtomicBool::new(false),
            hold_write: AtomicBool::new(false),
            reached: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        }
    }

    /// Hold the next fetch after it has read the row.
    pub fn hold_next_fetch(&self) {
        self.hold_fetch.store(true, Ordering::SeqCst);
    }

    /// Hold the next write before it reaches the backing store.
    pub fn hold_next_write(&self) {
        self.hold_write.store(true, Ordering::SeqCst);
    }

    /// Wait until a held call is parked at the gate.
    pub async fn held(&self) {
        self.reached.notified().await;
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    async fn pass(&self, hold: &AtomicBool) {
        if hold.swap(false, Ordering::SeqCst) {
            self.reached.notify_one();
            self.gate.notified().await;
        }
    }

    async fn fetch_gated(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
        let room = self.inner.fetch_room(room_id).await?;
        self.pass(&self.hold_fetch).await;
        Ok(room)
    }

    async fn write_gated(&self, room_id: &str, text: &str) -> Result<(), StoreError> {
        self.pass(&self.hold_write).await;
        self.inner.write_room_text(room_id, text).await
    }
}

#[cfg(test)]
impl RoomStore for GatedRoomStore {
    fn fetch_room<'a>(&'a self, room_id: &'a str) -> StoreFuture<'a, Option<RoomRecord>> {
        Box::pin(self.fetch_gated(room_id))
    }

    fn create_room<'a>(&'a self, room_id: Option<&'a str>, language: &'a str) -> StoreFuture<'a, RoomRecord> {
        self.inner.create_room(room_id, language)
    }

    fn write_room_text<'a>(&'a self, room_id: &'a str, text: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.write_gated(room_id, text))
    }
}
