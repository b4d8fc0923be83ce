use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::presence::awareness::MemoryHub;
use crate::presence::PresenceConfig;

/// Counters over every live room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub n_rooms: u32,
    pub n_conn: u32,
    pub n_records: u32,
}

/// One awareness hub per document id.
///
/// Rooms without traffic are dropped after the idle window. Connections keep
/// their hub alive on their own, and `touch` puts it back in the registry, so
/// a room that was evicted while in use is never split in two.
pub struct RoomRegistry {
    rooms: Cache<String, Arc<MemoryHub>>,
    awareness_timeout: Duration,
    sweep_interval: Duration,
}

impl RoomRegistry {
    pub fn new(config: &PresenceConfig, room_idle: Duration) -> Self {
        Self {
            rooms: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(room_idle)
                .build(),
            awareness_timeout: config.awareness_timeout,
            sweep_interval: config.sweep_interval,
        }
    }

    /// Get or create the room for a document.
    pub async fn open(&self, doc_id: &str) -> Arc<MemoryHub> {
        self.rooms
            .get_with(doc_id.to_string(), async {
                let hub = MemoryHub::new(self.awareness_timeout);
                // Stops by itself once the hub is gone
                hub.spawn_sweeper(self.sweep_interval);
                info!("Opened presence room for document {}", doc_id);
                hub
            })
            .await
    }

    pub async fn get(&self, doc_id: &str) -> Option<Arc<MemoryHub>> {
        self.rooms.get(doc_id).await
    }

    /// Mark a room as used, re-registering it if it was evicted meanwhile.
    pub async fn touch(&self, doc_id: &str, room: &Arc<MemoryHub>) {
        let room = room.clone();
        self.rooms.get_with(doc_id.to_string(), async move { room }).await;
    }

    pub fn stats(&self) -> RoomStats {
        let mut stats = RoomStats::default();
        for (_, hub) in self.rooms.iter() {
            stats.n_rooms += 1;
            stats.n_conn += hub.member_count() as u32;
            stats.n_records += hub.slot_count() as u32;
        }
        stats
    }
}
