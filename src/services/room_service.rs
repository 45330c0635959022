use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Text a room starts with before anybody typed into it.
pub const DEFAULT_CODE: &str = "# Start coding here...\n";

/// Boxed future returned by the persistence collaborator.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Callback invoked with `(room_id, text)` whenever a room has to be written back.
pub type SaveCallback =
    Arc<dyn Fn(String, String) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>> + Send + Sync>;

/// Persisted room row
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub id: String,
    pub code: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("room '{0}' not found")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage of rooms.
///
/// Implemented by the Postgres backend and by the in-process memory store used
/// when no database is configured.
pub trait RoomStore: Send + Sync {
    /// Fetch a room by id, `None` when it does not exist.
    fn fetch_room<'a>(&'a self, room_id: &'a str) -> StoreFuture<'a, Option<RoomRecord>>;

    /// Create a room holding [`DEFAULT_CODE`]. A fresh UUID is generated when `room_id` is `None`.
    fn create_room<'a>(&'a self, room_id: Option<&'a str>, language: &'a str) -> StoreFuture<'a, RoomRecord>;

    /// Overwrite the text of an existing room.
    fn write_room_text<'a>(&'a self, room_id: &'a str, text: &'a str) -> StoreFuture<'a, ()>;
}

/// Wrap a store into the callback shape consumed by the save debouncer.
pub fn save_callback(store: Arc<dyn RoomStore>) -> SaveCallback {
    Arc::new(
        move |room_id: String, text: String| -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send>> {
            let store = store.clone();
            Box::pin(async move { store.write_room_text(&room_id, &text).await })
        },
    )
}

/// Fetch a room, creating it with the default text if it does not exist yet.
pub async fn get_or_create_room(
    store: &dyn RoomStore,
    room_id: &str,
    language: &str,
) -> Result<RoomRecord, StoreError> {
    if let Some(room) = store.fetch_room(room_id).await? {
        return Ok(room);
    }

    info!("Room {} not found, creating it", room_id);
    store.create_room(Some(room_id), language).await
}

/// Read-through cache in front of another store.
///
/// Writes and creations invalidate the cached entry so a later fetch always
/// goes back to the backing store. Every write also stamps the room with a new
/// generation; a fetch only keeps its row in the cache if no write stamped the
/// room while it was loading.
pub struct CachedRoomStore {
    inner: Arc<dyn RoomStore>,
    cache: Cache<String, RoomRecord>,
    generations: moka::sync::Cache<String, u64>,
    next_generation: AtomicU64,
}

impl CachedRoomStore {
    pub fn new(inner: Arc<dyn RoomStore>, time_to_idle: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(time_to_idle)
            .build();
        let generations = moka::sync::Cache::builder()
            .max_capacity(100_000)
            .build();
        info!("Room cache initialized");
        Self {
            inner,
            cache,
            generations,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Stamp a room as written, then drop its cached row.
    async fn invalidate(&self, room_id: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.generations.insert(room_id.to_string(), generation);
        self.cache.invalidate(room_id).await;
    }

    #[cfg(test)]
    fn is_cached(&self, room_id: &str) -> bool {
        self.cache.contains_key(room_id)
    }
}

impl CachedRoomStore {
    async fn fetch_cached(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
        if let Some(room) = self.cache.get(room_id).await {
            return Ok(Some(room));
        }

        let seen = self.generations.get(room_id);
        let room = self.inner.fetch_room(room_id).await?;
        if let Some(ref room) = room {
            self.cache.insert(room_id.to_string(), room.clone()).await;
            // A write that stamped the room meanwhile may have invalidated
            // before the insert above; its row must not stay cached.
            if self.generations.get(room_id) != seen {
                self.cache.invalidate(room_id).await;
                debug!("Room {} changed while loading, not cached", room_id);
            }
        }
        Ok(room)
    }

    async fn create_uncached(&self, room_id: Option<&str>, language: &str) -> Result<RoomRecord, StoreError> {
        let room = self.inner.create_room(room_id, language).await?;
        self.invalidate(&room.id).await;
        Ok(room)
    }

    async fn write_uncached(&self, room_id: &str, text: &str) -> Result<(), StoreError> {
        let result = self.inner.write_room_text(room_id, text).await;
        // The row may have changed even when the call reports an error.
        self.invalidate(room_id).await;
        result
    }
}

impl RoomStore for CachedRoomStore {
    fn fetch_room<'a>(&'a self, room_id: &'a str) -> StoreFuture<'a, Option<RoomRecord>> {
        Box::pin(self.fetch_cached(room_id))
    }

    fn create_room<'a>(&'a self, room_id: Option<&'a str>, language: &'a str) -> StoreFuture<'a, RoomRecord> {
        Box::pin(self.create_uncached(room_id, language))
    }

    fn write_room_text<'a>(&'a self, room_id: &'a str, text: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(self.write_uncached(room_id, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_store::{GatedRoomStore, MemoryRoomStore};

    #[tokio::test]
    async fn get_or_create_creates_missing_room_once() {
        let store = MemoryRoomStore::new();
        let first = get_or_create_room(&store, "r1", "python").await.unwrap();
        assert_eq!(first.code, DEFAULT_CODE);

        store.write_room_text("r1", "x = 1").await.unwrap();
        let second = get_or_create_room(&store, "r1", "python").await.unwrap();
        assert_eq!(second.code, "x = 1");
    }

    #[tokio::test]
    async fn cache_is_invalidated_by_writes() {
        let backing = Arc::new(MemoryRoomStore::new());
        let cached = CachedRoomStore::new(backing.clone(), Duration::from_secs(60));
        cached.create_room(Some("r1"), "python").await.unwrap();

        let room = cached.fetch_room("r1").await.unwrap().unwrap();
        assert_eq!(room.code, DEFAULT_CODE);
        assert!(cached.is_cached("r1"));

        cached.write_room_text("r1", "print(1)").await.unwrap();
        assert!(!cached.is_cached("r1"));
        let room = cached.fetch_room("r1").await.unwrap().unwrap();
        assert_eq!(room.code, "print(1)");
    }

    #[tokio::test]
    async fn write_during_fetch_keeps_old_row_out_of_cache() {
        let backing = Arc::new(GatedRoomStore::new());
        backing.inner.create_room(Some("r1"), "python").await.unwrap();
        backing.inner.write_room_text("r1", "v1").await.unwrap();
        let cached = Arc::new(CachedRoomStore::new(backing.clone(), Duration::from_secs(60)));

        backing.hold_next_fetch();
        let reader = tokio::spawn({
            let cached = cached.clone();
            async move { cached.fetch_room("r1").await.unwrap().unwrap() }
        });
        backing.held().await;

        cached.write_room_text("r1", "v2").await.unwrap();
        backing.release();
        assert_eq!(reader.await.unwrap().code, "v1");

        assert!(!cached.is_cached("r1"));
        let room = cached.fetch_room("r1").await.unwrap().unwrap();
        assert_eq!(room.code, "v2");
        assert!(cached.is_cached("r1"));
    }

    #[tokio::test]
    async fn save_callback_writes_through_the_store() {
        let backing = Arc::new(MemoryRoomStore::new());
        backing.create_room(Some("r1"), "python").await.unwrap();
        let on_save = save_callback(backing.clone());

        on_save("r1".to_string(), "a = 2".to_string()).await.unwrap();
        assert_eq!(backing.writes_for("r1"), vec!["a = 2".to_string()]);
    }
}
