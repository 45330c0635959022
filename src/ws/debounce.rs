use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::roomstate::RoomStateStore;
use crate::services::room_service::{SaveCallback, StoreError};

struct PendingSave {
    token: u64,
    task: JoinHandle<()>,
}

/// Delays room write-backs until edits have been quiet for a while.
///
/// At most one timer is pending per room. Scheduling again replaces the
/// previous timer, so a burst of edits ends up as a single write of whatever
/// text the room holds when the timer fires.
pub struct DebounceScheduler {
    rooms: Arc<RoomStateStore>,
    quiet: Duration,
    pending: Arc<Mutex<HashMap<String, PendingSave>>>,
    next_token: AtomicU64,
}

impl DebounceScheduler {
    pub fn new(rooms: Arc<RoomStateStore>, quiet: Duration) -> Self {
        Self {
            rooms,
            quiet,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// (Re)arm the save timer of a room.
    pub async fn schedule_save(&self, room_id: &str, on_save: SaveCallback) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().await;

        if let Some(previous) = pending.remove(room_id) {
            previous.task.abort();
            debug!("Superseded pending save of room {}", room_id);
        }

        let task = tokio::spawn({
            let rooms = self.rooms.clone();
            let pending = self.pending.clone();
            let quiet = self.quiet;
            let room_id = room_id.to_string();
            async move {
                tokio::time::sleep(quiet).await;

                // Only the timer still registered for the room may fire.
                {
                    let mut pending = pending.lock().await;
                    let is_current = pending
                        .get(&room_id)
                        .is_some_and(|current| current.token == token);
                    if !is_current {
                        return;
                    }
                    pending.remove(&room_id);
                }

                if flush(&rooms, &room_id, &on_save).await.is_err() {
                    debug!("Room {} stays dirty until its next edit or leave", room_id);
                }
            }
        });

        pending.insert(room_id.to_string(), PendingSave { token, task });
        debug!("Save of room {} scheduled in {:?}", room_id, self.quiet);
    }

    /// Cancel the pending timer of a room and write it back right away.
    ///
    /// Returns whether anything was written.
    pub async fn force_save(&self, room_id: &str, on_save: SaveCallback) -> Result<bool, StoreError> {
        self.cancel(room_id).await;
        flush(&self.rooms, room_id, &on_save).await
    }

    /// Drop the pending timer of a room without writing anything.
    pub async fn cancel(&self, room_id: &str) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.remove(room_id) {
            Some(previous) => {
                previous.task.abort();
                debug!("Cancelled pending save of room {}", room_id);
                true
            }
            None => false,
        }
    }

    /// Force-save every dirty room. Used on shutdown.
    pub async fn flush_all(&self, on_save: SaveCallback) -> usize {
        {
            let mut pending = self.pending.lock().await;
            for (_, previous) in pending.drain() {
                previous.task.abort();
            }
        }

        let mut written = 0;
        for room_id in self.rooms.dirty_rooms().await {
            if let Ok(true) = flush(&self.rooms, &room_id, &on_save).await {
                written += 1;
            }
        }
        info!("Flushed {} dirty rooms", written);
        written
    }

    /// Number of rooms with an armed timer
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Write the current text of a dirty room and clear its flag on success.
async fn flush(rooms: &RoomStateStore, room_id: &str, on_save: &SaveCallback) -> Result<bool, StoreError> {
    let Some(gate) = rooms.write_gate(room_id).await else {
        return Ok(false);
    };
    let _writing = gate.lock().await;

    let Some(snapshot) = rooms.dirty_snapshot(room_id).await else {
        return Ok(false);
    };

    match on_save(room_id.to_string(), snapshot.text).await {
        Ok(()) => {
            if rooms.mark_clean(room_id, snapshot.revision).await {
                info!("Room {} saved", room_id);
            } else {
                info!("Room {} saved, newer edits still pending", room_id);
            }
            Ok(true)
        }
        Err(e) => {
            error!("Failed to save room {}: {}", room_id, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::{GatedRoomStore, MemoryRoomStore};
    use crate::services::room_service::{save_callback, RoomStore};

    const QUIET: Duration = Duration::from_secs(2);

    async fn setup() -> (Arc<RoomStateStore>, DebounceScheduler, Arc<MemoryRoomStore>, SaveCallback) {
        let rooms = Arc::new(RoomStateStore::new());
        let scheduler = DebounceScheduler::new(rooms.clone(), QUIET);
        let store = Arc::new(MemoryRoomStore::new());
        store.create_room(Some("r1"), "python").await.unwrap();
        rooms.set_initial("r1", "seed", "python").await;
        let on_save = save_callback(store.clone());
        (rooms, scheduler, store, on_save)
    }

    async fn settle(duration: Duration) {
        tokio::time::sleep(duration).await;
        tokio::task::yield_now().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_edits_writes_only_the_last_text() {
        let (rooms, scheduler, store, on_save) = setup().await;

        for text in ["a", "ab", "abc"] {
            rooms.update("r1", text).await;
            scheduler.schedule_save("r1", on_save.clone()).await;
            settle(Duration::from_millis(500)).await;
        }
        assert!(store.writes().is_empty());

        settle(QUIET).await;
        assert_eq!(store.writes_for("r1"), vec!["abc".to_string()]);
        assert!(!rooms.is_dirty("r1").await);
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_reads_text_at_fire_time() {
        let (rooms, scheduler, store, on_save) = setup().await;

        rooms.update("r1", "scheduled").await;
        scheduler.schedule_save("r1", on_save.clone()).await;
        // An edit that lands in the same window without rescheduling.
        rooms.update("r1", "later").await;

        settle(QUIET + Duration::from_millis(10)).await;
        assert_eq!(store.writes_for("r1"), vec!["later".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn force_save_wins_over_pending_timer() {
        let (rooms, scheduler, store, on_save) = setup().await;

        rooms.update("r1", "x=1").await;
        scheduler.schedule_save("r1", on_save.clone()).await;
        settle(Duration::from_millis(100)).await;

        assert!(scheduler.force_save("r1", on_save.clone()).await.unwrap());
        assert_eq!(store.writes_for("r1"), vec!["x=1".to_string()]);

        settle(QUIET * 2).await;
        assert_eq!(store.writes_for("r1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_save_of_clean_room_writes_nothing() {
        let (_rooms, scheduler, store, on_save) = setup().await;
        assert!(!scheduler.force_save("r1", on_save).await.unwrap());
        assert!(store.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_has_no_effect() {
        let (rooms, scheduler, store, on_save) = setup().await;

        rooms.update("r1", "draft").await;
        scheduler.schedule_save("r1", on_save).await;
        assert!(scheduler.cancel("r1").await);

        settle(QUIET * 2).await;
        assert!(store.writes().is_empty());
        assert!(rooms.is_dirty("r1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_keeps_room_dirty_until_next_attempt() {
        let (rooms, scheduler, store, on_save) = setup().await;
        store.set_failing(true);

        rooms.update("r1", "v1").await;
        scheduler.schedule_save("r1", on_save.clone()).await;
        settle(QUIET + Duration::from_millis(10)).await;
        assert!(rooms.is_dirty("r1").await);
        assert_eq!(scheduler.pending_count().await, 0);

        // No retry on its own.
        store.set_failing(false);
        settle(QUIET * 3).await;
        assert!(store.writes().is_empty());

        assert!(scheduler.force_save("r1", on_save).await.unwrap());
        assert_eq!(store.writes_for("r1"), vec!["v1".to_string()]);
        assert!(!rooms.is_dirty("r1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn force_save_reports_store_failure() {
        let (rooms, scheduler, store, on_save) = setup().await;
        store.set_failing(true);
        rooms.update("r1", "v1").await;

        assert!(scheduler.force_save("r1", on_save).await.is_err());
        assert!(rooms.is_dirty("r1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_all_saves_every_dirty_room_once() {
        let (rooms, scheduler, store, on_save) = setup().await;
        store.create_room(Some("r2"), "python").await.unwrap();
        rooms.set_initial("r2", "seed", "python").await;

        rooms.update("r1", "one").await;
        rooms.update("r2", "two").await;
        scheduler.schedule_save("r1", on_save.clone()).await;

        assert_eq!(scheduler.flush_all(on_save).await, 2);
        settle(QUIET * 2).await;
        assert_eq!(store.writes_for("r1"), vec!["one".to_string()]);
        assert_eq!(store.writes_for("r2"), vec!["two".to_string()]);
    }

    async fn gated_setup() -> (Arc<RoomStateStore>, DebounceScheduler, Arc<GatedRoomStore>, SaveCallback) {
        let rooms = Arc::new(RoomStateStore::new());
        let scheduler = DebounceScheduler::new(rooms.clone(), QUIET);
        let store = Arc::new(GatedRoomStore::new());
        store.inner.create_room(Some("r1"), "python").await.unwrap();
        rooms.set_initial("r1", "seed", "python").await;
        let on_save = save_callback(store.clone());
        (rooms, scheduler, store, on_save)
    }

    #[tokio::test(start_paused = true)]
    async fn edit_during_timer_write_keeps_room_dirty() {
        let (rooms, scheduler, store, on_save) = gated_setup().await;

        rooms.update("r1", "v1").await;
        scheduler.schedule_save("r1", on_save).await;
        store.hold_next_write();
        store.held().await;

        rooms.update("r1", "v2").await;
        store.release();
        settle(Duration::from_millis(10)).await;

        assert_eq!(store.inner.writes_for("r1"), vec!["v1".to_string()]);
        assert!(rooms.is_dirty("r1").await);
        assert_eq!(rooms.dirty_snapshot("r1").await.unwrap().text, "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn force_save_waits_for_timer_write_in_flight() {
        let (rooms, scheduler, store, on_save) = gated_setup().await;

        rooms.update("r1", "v1").await;
        scheduler.schedule_save("r1", on_save.clone()).await;
        store.hold_next_write();
        store.held().await;
        rooms.update("r1", "v2").await;

        let (forced, ()) = tokio::join!(scheduler.force_save("r1", on_save), async {
            settle(Duration::from_millis(10)).await;
            // The forced flush is queued behind the timer's write.
            assert!(store.inner.writes().is_empty());
            store.release();
        });

        assert!(forced.unwrap());
        assert_eq!(store.inner.writes_for("r1"), vec!["v1".to_string(), "v2".to_string()]);
        assert!(!rooms.is_dirty("r1").await);

        settle(QUIET * 2).await;
        assert_eq!(store.inner.writes_for("r1").len(), 2);
    }
}
