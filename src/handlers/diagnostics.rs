use crate::{models::{DiagnosticsResponse, ErrorResponse}, state::AppState};
use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Process and room diagnostics
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {

    let (n_rooms, n_conn) = state.registry.totals().await;
    let n_live_rooms = state.rooms.len().await;
    let n_dirty_rooms = state.rooms.dirty_rooms().await.len();
    let n_pending_saves = state.scheduler.pending_count().await;

    // System stats
    let (cpu_usage, memory_used, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}, Dirty: {}",
        cpu_usage,
        memory_used / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms,
        n_dirty_rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: n_conn as u32,
            n_rooms: n_rooms as u32,
            n_live_rooms: n_live_rooms as u32,
            n_dirty_rooms: n_dirty_rooms as u32,
            n_pending_saves: n_pending_saves as u32,
            cpu_usage,
            memory_used,
            memory_total,
            memory_free,
        }),
    ))
}
