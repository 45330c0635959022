pub mod broadcast;
pub mod debounce;
pub mod handler;
pub mod registry;
pub mod roomstate;
pub mod session;
