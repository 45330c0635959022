use std::sync::Arc;

use crate::config::Config;
use crate::services::room_service::{save_callback, RoomStore, SaveCallback};
use crate::ws::debounce::DebounceScheduler;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::roomstate::RoomStateStore;

/// Shared state handed to every handler and session
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn RoomStore>,
    pub registry: ConnectionRegistry,
    pub rooms: Arc<RoomStateStore>,
    pub scheduler: DebounceScheduler,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn RoomStore>) -> Arc<Self> {
        let rooms = Arc::new(RoomStateStore::new());
        let scheduler = DebounceScheduler::new(rooms.clone(), config.save_debounce());
        Arc::new(Self {
            config,
            store,
            registry: ConnectionRegistry::new(),
            rooms,
            scheduler,
        })
    }

    /// Write-back callback targeting the configured store
    pub fn on_save(&self) -> SaveCallback {
        save_callback(self.store.clone())
    }
}
