use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::services::room_service::DEFAULT_CODE;

#[derive(Debug)]
struct RoomEntry {
    text: String,
    language: String,
    dirty: bool,
    /// Bumped on every update, lets a finished save tell whether it wrote the latest text.
    revision: u64,
    /// Sessions currently attached to the room
    holders: usize,
    /// Serializes write-backs of this room
    write_gate: Arc<Mutex<()>>,
}

impl RoomEntry {
    fn new(text: String, language: String) -> Self {
        Self {
            text,
            language,
            dirty: false,
            revision: 0,
            holders: 0,
            write_gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Text of a dirty room captured for a write-back
#[derive(Debug, Clone, PartialEq)]
pub struct DirtySnapshot {
    pub text: String,
    pub revision: u64,
}

/// Latest known text of every live room.
///
/// All reads and writes go through one lock so an update, a read and a flag
/// reset never interleave.
#[derive(Default)]
pub struct RoomStateStore {
    rooms: Mutex<HashMap<String, RoomEntry>>,
    /// Bumped under the lock on every eviction
    evictions: AtomicU64,
}

impl RoomStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current text of a room, or [`DEFAULT_CODE`] when the room is unknown.
    pub async fn get(&self, room_id: &str) -> String {
        let rooms = self.rooms.lock().await;
        rooms
            .get(room_id)
            .map(|entry| entry.text.clone())
            .unwrap_or_else(|| DEFAULT_CODE.to_string())
    }

    /// Text of a room only if it is live in memory.
    pub async fn live_text(&self, room_id: &str) -> Option<String> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).map(|entry| entry.text.clone())
    }

    /// Seed a room's text unless it already has an entry.
    pub async fn set_initial(&self, room_id: &str, text: &str, language: &str) {
        let mut rooms = self.rooms.lock().await;
        Self::seed(&mut rooms, room_id, text, language);
    }

    /// Overwrite a room's text and mark it dirty.
    pub async fn update(&self, room_id: &str, text: &str) {
        let mut rooms = self.rooms.lock().await;
        let entry = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomEntry::new(String::new(), String::new()));
        entry.text = text.to_string();
        entry.dirty = true;
        entry.revision += 1;
    }

    pub async fn is_dirty(&self, room_id: &str) -> bool {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).is_some_and(|entry| entry.dirty)
    }

    /// Eviction count, to be read before loading a room from persistence.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::SeqCst)
    }

    /// Attach a session to a room, returning its current text and language.
    /// Pairs with [`RoomStateStore::detach`].
    ///
    /// A live entry always wins over `text`. Without one, the room is seeded
    /// from `text` unless some room was evicted since `seen_evictions` was
    /// read, in which case `text` may predate the evicted room's last save and
    /// `None` is returned so the caller reloads it.
    pub async fn attach(
        &self,
        room_id: &str,
        seen_evictions: u64,
        text: &str,
        language: &str,
    ) -> Option<(String, String)> {
        let mut rooms = self.rooms.lock().await;
        if !rooms.contains_key(room_id) && self.evictions.load(Ordering::SeqCst) != seen_evictions {
            return None;
        }
        let entry = Self::seed(&mut rooms, room_id, text, language);
        entry.holders += 1;
        Some((entry.text.clone(), entry.language.clone()))
    }

    /// Detach a session. The entry is evicted once no session holds it and
    /// nothing is left unsaved. Returns whether it was evicted.
    pub async fn detach(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.lock().await;
        let Some(entry) = rooms.get_mut(room_id) else {
            return false;
        };
        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders == 0 && !entry.dirty {
            rooms.remove(room_id);
            self.evictions.fetch_add(1, Ordering::SeqCst);
            debug!("Evicted idle room state {}", room_id);
            return true;
        }
        false
    }

    /// Text and revision of a room if it has unsaved changes.
    pub async fn dirty_snapshot(&self, room_id: &str) -> Option<DirtySnapshot> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).filter(|entry| entry.dirty).map(|entry| DirtySnapshot {
            text: entry.text.clone(),
            revision: entry.revision,
        })
    }

    /// Clear the dirty flag if nothing changed since `revision` was captured.
    pub async fn mark_clean(&self, room_id: &str, revision: u64) -> bool {
        let mut rooms = self.rooms.lock().await;
        match rooms.get_mut(room_id) {
            Some(entry) if entry.revision == revision => {
                entry.dirty = false;
                true
            }
            _ => false,
        }
    }

    /// Lock serializing write-backs of a room
    pub async fn write_gate(&self, room_id: &str) -> Option<Arc<Mutex<()>>> {
        let rooms = self.rooms.lock().await;
        rooms.get(room_id).map(|entry| entry.write_gate.clone())
    }

    /// Ids of every room with unsaved changes
    pub async fn dirty_rooms(&self) -> Vec<String> {
        let rooms = self.rooms.lock().await;
        rooms
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of rooms held in memory
    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }

    fn seed<'a>(
        rooms: &'a mut HashMap<String, RoomEntry>,
        room_id: &str,
        text: &str,
        language: &str,
    ) -> &'a mut RoomEntry {
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomEntry::new(text.to_string(), language.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_room_reads_as_placeholder() {
        let store = RoomStateStore::new();
        assert_eq!(store.get("r1").await, DEFAULT_CODE);
        assert!(store.live_text("r1").await.is_none());
    }

    #[tokio::test]
    async fn set_initial_never_overwrites() {
        let store = RoomStateStore::new();
        store.set_initial("r1", "first", "python").await;
        store.set_initial("r1", "second", "python").await;
        assert_eq!(store.get("r1").await, "first");

        store.update("r1", "edited").await;
        store.set_initial("r1", "from db", "python").await;
        assert_eq!(store.get("r1").await, "edited");
    }

    #[tokio::test]
    async fn update_marks_dirty_and_bumps_revision() {
        let store = RoomStateStore::new();
        store.set_initial("r1", "a", "python").await;
        assert!(!store.is_dirty("r1").await);
        assert!(store.dirty_snapshot("r1").await.is_none());

        store.update("r1", "b").await;
        store.update("r1", "c").await;
        assert!(store.is_dirty("r1").await);
        assert_eq!(
            store.dirty_snapshot("r1").await,
            Some(DirtySnapshot { text: "c".to_string(), revision: 2 })
        );
    }

    #[tokio::test]
    async fn stale_revision_does_not_clear_dirty_flag() {
        let store = RoomStateStore::new();
        store.update("r1", "a").await;
        let snapshot = store.dirty_snapshot("r1").await.unwrap();
        store.update("r1", "b").await;

        assert!(!store.mark_clean("r1", snapshot.revision).await);
        assert!(store.is_dirty("r1").await);

        let snapshot = store.dirty_snapshot("r1").await.unwrap();
        assert!(store.mark_clean("r1", snapshot.revision).await);
        assert!(!store.is_dirty("r1").await);
    }

    #[tokio::test]
    async fn attach_returns_existing_text_and_detach_evicts_clean_rooms() {
        let store = RoomStateStore::new();
        let (text, language) = store.attach("r1", store.evictions(), "seed", "python").await.unwrap();
        assert_eq!((text.as_str(), language.as_str()), ("seed", "python"));

        store.update("r1", "live").await;
        let (text, _) = store.attach("r1", store.evictions(), "stale db text", "python").await.unwrap();
        assert_eq!(text, "live");

        assert!(!store.detach("r1").await);
        let snapshot = store.dirty_snapshot("r1").await.unwrap();
        store.mark_clean("r1", snapshot.revision).await;
        assert!(store.detach("r1").await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn dirty_room_survives_last_detach() {
        let store = RoomStateStore::new();
        store.attach("r1", store.evictions(), "seed", "python").await;
        store.update("r1", "unsaved").await;

        assert!(!store.detach("r1").await);
        assert_eq!(store.dirty_rooms().await, vec!["r1".to_string()]);
        assert_eq!(store.get("r1").await, "unsaved");
    }

    #[tokio::test]
    async fn eviction_after_load_started_forces_reload() {
        let store = RoomStateStore::new();
        store.attach("r1", store.evictions(), "old", "python").await;
        store.update("r1", "latest").await;

        // A joiner starts loading "r1" while it is still live.
        let seen = store.evictions();
        let snapshot = store.dirty_snapshot("r1").await.unwrap();
        store.mark_clean("r1", snapshot.revision).await;
        assert!(store.detach("r1").await);

        assert!(store.attach("r1", seen, "old", "python").await.is_none());
        assert_eq!(store.len().await, 0);

        let (text, _) = store.attach("r1", store.evictions(), "latest", "python").await.unwrap();
        assert_eq!(text, "latest");
    }

    #[tokio::test]
    async fn live_entry_is_attached_despite_unrelated_evictions() {
        let store = RoomStateStore::new();
        store.attach("r1", store.evictions(), "live", "python").await;
        let seen = store.evictions();
        store.attach("r2", store.evictions(), "other", "python").await;
        assert!(store.detach("r2").await);

        let (text, _) = store.attach("r1", seen, "db text", "python").await.unwrap();
        assert_eq!(text, "live");
    }
}
