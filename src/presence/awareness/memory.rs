use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{
    diff_slot, AwarenessChannel, AwarenessEvent, AwarenessSnapshot, ChangeOrigin,
    ConnectionStatus, PeerRecord, PeerSlot, SlotChange,
};

const EVENT_CAPACITY: usize = 256;

struct SlotEntry {
    record: PeerRecord,
    refreshed: Instant,
}

#[derive(Default)]
struct HubState {
    slots: BTreeMap<PeerSlot, SlotEntry>,
    members: HashMap<PeerSlot, broadcast::Sender<AwarenessEvent>>,
}

impl HubState {
    fn snapshot(&self) -> AwarenessSnapshot {
        self.slots
            .iter()
            .map(|(slot, entry)| (*slot, entry.record.clone()))
            .collect()
    }

    fn notify(&self, event: AwarenessEvent) {
        for tx in self.members.values() {
            // A member without live receivers is fine
            let _ = tx.send(event.clone());
        }
    }
}

/// In-process awareness transport for one document.
///
/// Every connected handle gets its own slot. The relay server keeps one hub
/// per document room and tests use it to simulate several peers.
pub struct MemoryHub {
    state: Mutex<HubState>,
    next_slot: AtomicU64,
    timeout: Duration,
}

impl MemoryHub {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::default(),
            next_slot: AtomicU64::new(1),
            timeout,
        })
    }

    /// Open a new connection with a fresh slot.
    pub fn connect(self: &Arc<Self>) -> MemoryAwareness {
        MemoryAwareness::new(self.clone())
    }

    pub fn states(&self) -> AwarenessSnapshot {
        self.lock().snapshot()
    }

    pub fn slot_count(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn member_count(&self) -> usize {
        self.lock().members.len()
    }

    /// Drop every slot that was not refreshed within the awareness timeout.
    pub fn remove_outdated(&self) -> Vec<PeerSlot> {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<PeerSlot> = state
            .slots
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.refreshed) >= self.timeout)
            .map(|(slot, _)| *slot)
            .collect();
        if expired.is_empty() {
            return expired;
        }

        for slot in &expired {
            state.slots.remove(slot);
        }
        state.notify(AwarenessEvent::new(
            ChangeOrigin::Transport,
            expired.iter().map(|slot| SlotChange::Removed(*slot)).collect(),
        ));
        debug!("Removed {} outdated awareness slot(s): {:?}", expired.len(), expired);
        expired
    }

    /// Run `remove_outdated` on a fixed interval until the hub is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let hub = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                hub.remove_outdated();
            }
        })
    }

    fn join(&self, events: broadcast::Sender<AwarenessEvent>) -> PeerSlot {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();

        // A joiner first learns about everyone already present
        let existing: Vec<SlotChange> = state
            .slots
            .iter()
            .map(|(s, entry)| SlotChange::Added(*s, entry.record.clone()))
            .collect();
        if !existing.is_empty() {
            let _ = events.send(AwarenessEvent::new(ChangeOrigin::Transport, existing));
        }
        state.members.insert(slot, events);
        slot
    }

    fn set(&self, slot: PeerSlot, record: Option<PeerRecord>) {
        let mut state = self.lock();
        let change = diff_slot(slot, state.slots.get(&slot).map(|e| &e.record), record.as_ref());
        match record {
            Some(record) => {
                state.slots.insert(
                    slot,
                    SlotEntry {
                        record,
                        refreshed: Instant::now(),
                    },
                );
            }
            None => {
                state.slots.remove(&slot);
            }
        }
        if let Some(change) = change {
            state.notify(AwarenessEvent::new(ChangeOrigin::Peer(slot), vec![change]));
        }
    }

    fn leave(&self, slot: PeerSlot) {
        let mut state = self.lock();
        state.members.remove(&slot);
        if state.slots.remove(&slot).is_some() {
            state.notify(AwarenessEvent::new(
                ChangeOrigin::Transport,
                vec![SlotChange::Removed(slot)],
            ));
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct LocalState {
    slot: PeerSlot,
    record: Option<PeerRecord>,
    connected: bool,
}

/// One peer's connection to a [`MemoryHub`].
///
/// Dropping the handle disconnects it.
pub struct MemoryAwareness {
    hub: Arc<MemoryHub>,
    local: Mutex<LocalState>,
    events: broadcast::Sender<AwarenessEvent>,
    status: watch::Sender<ConnectionStatus>,
}

impl MemoryAwareness {
    fn new(hub: Arc<MemoryHub>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let slot = hub.join(events.clone());
        let (status, _) = watch::channel(ConnectionStatus::Connected);
        debug!("Awareness slot {} connected", slot);
        Self {
            hub,
            local: Mutex::new(LocalState {
                slot,
                record: None,
                connected: true,
            }),
            events,
            status,
        }
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// Simulate transport loss: the slot disappears for everyone and the
    /// remote slots disappear for local observers.
    pub fn disconnect(&self) {
        let mut local = self.lock();
        if !local.connected {
            return;
        }

        let own = local.slot;
        let remote: Vec<SlotChange> = self
            .hub
            .states()
            .keys()
            .filter(|slot| **slot != own)
            .map(|slot| SlotChange::Removed(*slot))
            .collect();
        self.hub.leave(own);
        local.connected = false;
        drop(local);

        if !remote.is_empty() {
            let _ = self.events.send(AwarenessEvent::new(ChangeOrigin::Transport, remote));
        }
        self.status.send_replace(ConnectionStatus::Disconnected);
        info!("Awareness slot {} disconnected", own);
    }

    /// Rejoin on a fresh slot and re-send the last local record.
    pub fn reconnect(&self) {
        let mut local = self.lock();
        if local.connected {
            return;
        }

        self.status.send_replace(ConnectionStatus::Connecting);
        local.slot = self.hub.join(self.events.clone());
        local.connected = true;
        if let Some(record) = local.record.clone() {
            self.hub.set(local.slot, Some(record));
        }
        let slot = local.slot;
        drop(local);

        self.status.send_replace(ConnectionStatus::Connected);
        info!("Awareness reconnected on slot {}", slot);
    }

    fn write(&self, record: Option<PeerRecord>) {
        let mut local = self.lock();
        let previous = std::mem::replace(&mut local.record, record.clone());
        if local.connected {
            self.hub.set(local.slot, record);
        } else if let Some(change) = diff_slot(local.slot, previous.as_ref(), record.as_ref()) {
            let _ = self
                .events
                .send(AwarenessEvent::new(ChangeOrigin::Peer(local.slot), vec![change]));
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AwarenessChannel for MemoryAwareness {
    fn local_slot(&self) -> PeerSlot {
        self.lock().slot
    }

    fn local_state(&self) -> Option<PeerRecord> {
        self.lock().record.clone()
    }

    fn states(&self) -> AwarenessSnapshot {
        let local = self.lock();
        if local.connected {
            return self.hub.states();
        }
        let mut only_local = AwarenessSnapshot::new();
        if let Some(record) = &local.record {
            only_local.insert(local.slot, record.clone());
        }
        only_local
    }

    fn publish(&self, record: PeerRecord) {
        self.write(Some(record));
    }

    fn clear(&self) {
        self.write(None);
    }

    fn subscribe(&self) -> broadcast::Receiver<AwarenessEvent> {
        self.events.subscribe()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

impl Drop for MemoryAwareness {
    fn drop(&mut self) {
        let local = self.lock();
        if local.connected {
            self.hub.leave(local.slot);
        }
    }
}
