//! Keeps the local record visible to peers.
//!
//! The controller re-publishes the unchanged local record when the channel
//! grows (debounced), when the host comes back to the foreground, when the
//! transport reconnects, and on a fixed heartbeat. A rebroadcast writes a
//! transient marker and removes it on the next tick, so value-diffed channels
//! still see two distinct writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::awareness::{AwarenessChannel, ConnectionStatus};
use super::lifecycle::Lifecycle;
use super::PresenceConfig;

/// Signals from the host environment (tab visibility, window focus).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Visible,
    Hidden,
    Focus,
    Blur,
}

impl HostEvent {
    fn regains_attention(self) -> bool {
        matches!(self, HostEvent::Visible | HostEvent::Focus)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebroadcastReason {
    PeerGrowth,
    Foreground,
    Reconnected,
    Heartbeat,
}

/// Edge detector on the channel's slot count.
///
/// The first observation only seeds the detector.
#[derive(Debug, Default)]
pub struct SlotGrowth {
    last: Option<usize>,
}

impl SlotGrowth {
    pub fn seeded(count: usize) -> Self {
        Self { last: Some(count) }
    }

    /// True when `count` is larger than the previous observation.
    pub fn observe(&mut self, count: usize) -> bool {
        let grew = matches!(self.last, Some(previous) if count > previous);
        self.last = Some(count);
        grew
    }
}

/// Rebroadcast counters, per trigger.
#[derive(Debug, Default)]
pub struct LivenessStats {
    peer_growth: AtomicU64,
    foreground: AtomicU64,
    reconnected: AtomicU64,
    heartbeat: AtomicU64,
}

impl LivenessStats {
    fn counter(&self, reason: RebroadcastReason) -> &AtomicU64 {
        match reason {
            RebroadcastReason::PeerGrowth => &self.peer_growth,
            RebroadcastReason::Foreground => &self.foreground,
            RebroadcastReason::Reconnected => &self.reconnected,
            RebroadcastReason::Heartbeat => &self.heartbeat,
        }
    }

    fn record(&self, reason: RebroadcastReason) {
        self.counter(reason).fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, reason: RebroadcastReason) -> u64 {
        self.counter(reason).load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        [
            RebroadcastReason::PeerGrowth,
            RebroadcastReason::Foreground,
            RebroadcastReason::Reconnected,
            RebroadcastReason::Heartbeat,
        ]
        .into_iter()
        .map(|reason| self.count(reason))
        .sum()
    }
}

pub struct RebroadcastController {
    channel: Arc<dyn AwarenessChannel>,
    config: PresenceConfig,
    lifecycle: Arc<Lifecycle>,
    stats: Arc<LivenessStats>,
    marker: u64,
}

impl RebroadcastController {
    pub fn new(
        channel: Arc<dyn AwarenessChannel>,
        config: PresenceConfig,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self {
            channel,
            config,
            lifecycle,
            stats: Arc::new(LivenessStats::default()),
            marker: 0,
        }
    }

    pub fn stats(&self) -> Arc<LivenessStats> {
        self.stats.clone()
    }

    /// Force a distinct observable revision of the local record.
    ///
    /// Returns false when there is nothing to re-publish.
    pub async fn rebroadcast(&mut self, reason: RebroadcastReason) -> bool {
        let marker = self.marker.wrapping_add(1);
        let channel = &*self.channel;
        let published = self.lifecycle.while_live(|| {
            let Some(mut record) = channel.local_state() else {
                return false;
            };
            record.marker = Some(marker);
            channel.publish(record);
            true
        });
        if published != Some(true) {
            return false;
        }
        self.marker = marker;
        self.stats.record(reason);

        tokio::task::yield_now().await;
        // Re-read: the cursor may have moved during the tick
        let channel = &*self.channel;
        self.lifecycle.while_live(|| {
            if let Some(mut current) = channel.local_state() {
                current.marker = None;
                channel.publish(current);
            }
        });
        debug!("Rebroadcast local record ({:?})", reason);
        true
    }

    /// Drive every trigger until disposal or until the channel closes.
    pub async fn run(mut self, mut host_events: mpsc::Receiver<HostEvent>) {
        let mut events = self.channel.subscribe();
        let mut status = self.channel.status();
        let mut growth = SlotGrowth::seeded(self.channel.slot_count());
        let mut connected = *status.borrow_and_update() == ConnectionStatus::Connected;
        let mut host_open = true;
        let mut deadline: Option<Instant> = None;

        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Liveness controller started on slot {}", self.channel.local_slot());
        while !self.lifecycle.is_disposed() {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if growth.observe(self.channel.slot_count()) {
                            deadline = Some(Instant::now() + self.config.rebroadcast_debounce);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.rebroadcast(RebroadcastReason::PeerGrowth).await;
                }
                _ = heartbeat.tick() => {
                    self.rebroadcast(RebroadcastReason::Heartbeat).await;
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_connected = *status.borrow_and_update() == ConnectionStatus::Connected;
                    if now_connected && !connected {
                        self.rebroadcast(RebroadcastReason::Reconnected).await;
                    }
                    connected = now_connected;
                }
                host = host_events.recv(), if host_open => match host {
                    Some(event) if event.regains_attention() => {
                        self.rebroadcast(RebroadcastReason::Foreground).await;
                    }
                    Some(_) => {}
                    None => host_open = false,
                },
            }
        }
        debug!("Liveness controller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::awareness::{MemoryHub, PeerRecord};
    use std::time::Duration;

    #[test]
    fn growth_fires_only_on_increase() {
        let mut growth = SlotGrowth::default();
        let fired: Vec<bool> = [1, 1, 2, 2, 1].into_iter().map(|c| growth.observe(c)).collect();
        assert_eq!(fired, vec![false, false, true, false, false]);

        let mut seeded = SlotGrowth::seeded(1);
        assert!(seeded.observe(3));
        assert!(!seeded.observe(2));
        assert!(seeded.observe(3));
    }

    fn config() -> PresenceConfig {
        PresenceConfig {
            heartbeat_interval: Duration::from_secs(10),
            rebroadcast_debounce: Duration::from_millis(500),
            ..PresenceConfig::default()
        }
    }

    #[tokio::test]
    async fn rebroadcast_produces_two_observable_writes() {
        let hub = MemoryHub::new(Duration::from_secs(30));
        let local = Arc::new(hub.connect());
        let observer = hub.connect();
        local.publish(PeerRecord::default());
        let mut rx = observer.subscribe();

        let mut controller =
            RebroadcastController::new(local.clone(), config(), Lifecycle::new());
        assert!(controller.rebroadcast(RebroadcastReason::Heartbeat).await);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.updated(), vec![local.local_slot()]);
        assert_eq!(second.updated(), vec![local.local_slot()]);
        assert_eq!(local.local_state(), Some(PeerRecord::default()));
        assert_eq!(controller.stats().count(RebroadcastReason::Heartbeat), 1);
    }

    #[tokio::test]
    async fn nothing_to_rebroadcast_without_local_record() {
        let hub = MemoryHub::new(Duration::from_secs(30));
        let local = Arc::new(hub.connect());
        let mut controller =
            RebroadcastController::new(local, config(), Lifecycle::new());
        assert!(!controller.rebroadcast(RebroadcastReason::Foreground).await);
        assert_eq!(controller.stats().total(), 0);
    }

    #[tokio::test]
    async fn disposed_controller_is_a_no_op() {
        let hub = MemoryHub::new(Duration::from_secs(30));
        let local = Arc::new(hub.connect());
        local.publish(PeerRecord::default());
        let lifecycle = Lifecycle::new();
        lifecycle.dispose(|| {});
        let mut controller = RebroadcastController::new(local, config(), lifecycle);
        assert!(!controller.rebroadcast(RebroadcastReason::Heartbeat).await);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_growth_is_debounced_into_one_rebroadcast() {
        let hub = MemoryHub::new(Duration::from_secs(60));
        let local = Arc::new(hub.connect());
        local.publish(PeerRecord::default());

        let controller =
            RebroadcastController::new(local.clone(), config(), Lifecycle::new());
        let stats = controller.stats();
        let (_host_tx, host_rx) = mpsc::channel(4);
        let task = tokio::spawn(controller.run(host_rx));
        tokio::time::sleep(Duration::from_millis(1)).await;

        // A burst of joins inside the window coalesces
        let b = hub.connect();
        b.publish(PeerRecord::default());
        tokio::time::sleep(Duration::from_millis(200)).await;
        let c = hub.connect();
        c.publish(PeerRecord::default());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(stats.count(RebroadcastReason::PeerGrowth), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(stats.count(RebroadcastReason::PeerGrowth), 1);

        // A departure schedules nothing
        drop(c);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(stats.count(RebroadcastReason::PeerGrowth), 1);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_foreground_and_reconnect_trigger_rebroadcasts() {
        let hub = MemoryHub::new(Duration::from_secs(60));
        let local = Arc::new(hub.connect());
        local.publish(PeerRecord::default());

        let controller =
            RebroadcastController::new(local.clone(), config(), Lifecycle::new());
        let stats = controller.stats();
        let (host_tx, host_rx) = mpsc::channel(4);
        let task = tokio::spawn(controller.run(host_rx));
        tokio::time::sleep(Duration::from_millis(1)).await;

        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(stats.count(RebroadcastReason::Heartbeat), 1);

        host_tx.send(HostEvent::Hidden).await.unwrap();
        host_tx.send(HostEvent::Visible).await.unwrap();
        host_tx.send(HostEvent::Focus).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stats.count(RebroadcastReason::Foreground), 2);

        local.disconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        local.reconnect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stats.count(RebroadcastReason::Reconnected), 1);

        task.abort();
    }
}
