use crate::{models::DiagnosticsResponse, AppState};
use axum::{extract::State, http::StatusCode, Json};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Relay and host statistics
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<DiagnosticsResponse>) {
    let stats = state.rooms.stats();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
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
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Rooms: {}, Conn: {}, Records: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.n_rooms,
        stats.n_conn,
        stats.n_records
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_rooms: stats.n_rooms,
            n_conn: stats.n_conn,
            n_records: stats.n_records,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
