pub mod autocomplete_service;
pub mod memory_store;
pub mod room_service;
