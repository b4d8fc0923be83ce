use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{
    diff_slot, AwarenessChannel, AwarenessEvent, AwarenessSnapshot, ChangeOrigin,
    ConnectionStatus, PeerRecord, PeerSlot, SlotChange,
};
use crate::models::{ClientMessage, PublishMessage, ServerMessage, SlotState};
use crate::presence::error::{PresenceError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;

struct WsState {
    slot: PeerSlot,
    local: Option<PeerRecord>,
    remote: AwarenessSnapshot,
    connected: bool,
}

struct WsShared {
    state: Mutex<WsState>,
    events: broadcast::Sender<AwarenessEvent>,
    status: watch::Sender<ConnectionStatus>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
}

impl WsShared {
    fn lock(&self) -> MutexGuard<'_, WsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, origin: ChangeOrigin, changes: Vec<SlotChange>) {
        if !changes.is_empty() {
            let _ = self.events.send(AwarenessEvent::new(origin, changes));
        }
    }

    /// Replace the remote view with the relay's full state.
    fn on_welcome(&self, slot: PeerSlot, states: Vec<SlotState>) {
        let mut state = self.lock();
        let incoming: AwarenessSnapshot = states
            .into_iter()
            .filter(|s| s.slot != slot)
            .map(|s| (s.slot, s.record))
            .collect();

        let mut changes: Vec<SlotChange> = state
            .remote
            .keys()
            .filter(|s| !incoming.contains_key(s))
            .map(|s| SlotChange::Removed(*s))
            .collect();
        changes.extend(
            incoming
                .iter()
                .filter_map(|(s, record)| diff_slot(*s, state.remote.get(s), Some(record))),
        );

        state.slot = slot;
        state.remote = incoming;
        state.connected = true;
        drop(state);

        self.status.send_replace(ConnectionStatus::Connected);
        self.emit(ChangeOrigin::Transport, changes);
        debug!("Relay assigned awareness slot {}", slot);
    }

    fn on_state(&self, slot: PeerSlot, record: Option<PeerRecord>) {
        let mut state = self.lock();
        if slot == state.slot {
            return;
        }
        let change = diff_slot(slot, state.remote.get(&slot), record.as_ref());
        match record {
            Some(record) => {
                state.remote.insert(slot, record);
            }
            None => {
                state.remote.remove(&slot);
            }
        }
        drop(state);

        if let Some(change) = change {
            self.emit(ChangeOrigin::Peer(slot), vec![change]);
        }
    }

    /// Remote slots never outlive the connection they were seen on.
    fn on_transport_lost(&self) {
        let mut state = self.lock();
        state.connected = false;
        let removed: Vec<SlotChange> = std::mem::take(&mut state.remote)
            .into_keys()
            .map(SlotChange::Removed)
            .collect();
        drop(state);

        self.status.send_replace(ConnectionStatus::Disconnected);
        self.emit(ChangeOrigin::Transport, removed);
    }

    fn write_local(&self, record: Option<PeerRecord>) {
        let mut state = self.lock();
        let previous = std::mem::replace(&mut state.local, record.clone());
        let change = diff_slot(state.slot, previous.as_ref(), record.as_ref());
        let slot = state.slot;
        if state.connected {
            let message = match record {
                Some(record) => ClientMessage::Publish(PublishMessage { record }),
                None => ClientMessage::Clear,
            };
            if self.outbound.send(message).is_err() {
                warn!("Awareness connection task has stopped, write kept locally");
            }
        }
        drop(state);

        if let Some(change) = change {
            self.emit(ChangeOrigin::Peer(slot), vec![change]);
        }
    }
}

/// Awareness channel backed by the relay's `/ws/{doc_id}` endpoint.
///
/// The relay assigns a new slot on every connection. After a transport loss
/// the channel drops all remote slots, retries with a fixed delay and re-sends
/// the last local record once welcomed again.
pub struct WsAwareness {
    shared: Arc<WsShared>,
    task: JoinHandle<()>,
}

impl WsAwareness {
    /// Connect and wait for the relay's welcome.
    pub async fn connect(url: &str, reconnect_delay: Duration) -> Result<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let shared = Arc::new(WsShared {
            state: Mutex::new(WsState {
                slot: 0,
                local: None,
                remote: AwarenessSnapshot::new(),
                connected: false,
            }),
            events,
            status,
            outbound,
        });

        let stream = open(url, &shared).await?;
        info!("Awareness connected to {}", url);

        let task = tokio::spawn(run_connection(
            url.to_string(),
            shared.clone(),
            stream,
            outbound_rx,
            reconnect_delay,
        ));
        Ok(Self { shared, task })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Ask the relay for a pong to check a quiet connection.
    pub fn ping(&self) -> Result<()> {
        self.shared
            .outbound
            .send(ClientMessage::Ping)
            .map_err(|_| PresenceError::TransportClosed)
    }
}

impl AwarenessChannel for WsAwareness {
    fn local_slot(&self) -> PeerSlot {
        self.shared.lock().slot
    }

    fn local_state(&self) -> Option<PeerRecord> {
        self.shared.lock().local.clone()
    }

    fn states(&self) -> AwarenessSnapshot {
        let state = self.shared.lock();
        let mut states = state.remote.clone();
        if let Some(local) = &state.local {
            states.insert(state.slot, local.clone());
        }
        states
    }

    fn publish(&self, record: PeerRecord) {
        self.shared.write_local(Some(record));
    }

    fn clear(&self) {
        self.shared.write_local(None);
    }

    fn subscribe(&self) -> broadcast::Receiver<AwarenessEvent> {
        self.shared.events.subscribe()
    }

    fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }
}

impl Drop for WsAwareness {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn open(url: &str, shared: &WsShared) -> Result<WsStream> {
    shared.status.send_replace(ConnectionStatus::Connecting);
    let (mut stream, _) = connect_async(url).await?;

    while let Some(message) = stream.next().await {
        if let Message::Text(text) = message? {
            if let ServerMessage::Welcome(welcome) = serde_json::from_str::<ServerMessage>(text.as_str())? {
                shared.on_welcome(welcome.slot, welcome.states);
                return Ok(stream);
            }
        }
    }
    Err(PresenceError::MissingWelcome)
}

enum PumpOutcome {
    Lost,
    Stopped,
}

async fn run_connection(
    url: String,
    shared: Arc<WsShared>,
    mut stream: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    reconnect_delay: Duration,
) {
    loop {
        // Re-announce ourselves on every fresh connection
        let local = shared.lock().local.clone();
        if let Some(record) = local {
            if let Ok(text) = serde_json::to_string(&ClientMessage::Publish(PublishMessage { record })) {
                let _ = stream.send(Message::Text(text.into())).await;
            }
        }

        match pump(&shared, &mut stream, &mut outbound_rx).await {
            PumpOutcome::Stopped => break,
            PumpOutcome::Lost => {}
        }

        shared.on_transport_lost();
        // Writes queued for the dead connection are older than the local record
        while outbound_rx.try_recv().is_ok() {}
        warn!("Awareness transport lost, retrying in {:?}", reconnect_delay);

        stream = loop {
            tokio::time::sleep(reconnect_delay).await;
            match open(&url, &shared).await {
                Ok(stream) => break stream,
                Err(e) => {
                    warn!("Awareness reconnect to {} failed: {}", url, e);
                    shared.status.send_replace(ConnectionStatus::Disconnected);
                }
            }
        };
        info!("Awareness reconnected to {}", url);
    }
}

async fn pump(
    shared: &WsShared,
    stream: &mut WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> PumpOutcome {
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(ServerMessage::Welcome(welcome)) => shared.on_welcome(welcome.slot, welcome.states),
                        Ok(ServerMessage::State(state)) => shared.on_state(state.slot, state.record),
                        Ok(ServerMessage::Pong(pong)) => debug!("Relay pong at {}", pong.date),
                        Err(e) => warn!("Ignoring malformed relay message: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return PumpOutcome::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Awareness websocket error: {}", e);
                    return PumpOutcome::Lost;
                }
            },
            outgoing = outbound_rx.recv() => match outgoing {
                Some(message) => {
                    let text = match serde_json::to_string(&message) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode awareness message: {}", e);
                            continue;
                        }
                    };
                    if stream.send(Message::Text(text.into())).await.is_err() {
                        return PumpOutcome::Lost;
                    }
                }
                None => {
                    let _ = stream.close(None).await;
                    return PumpOutcome::Stopped;
                }
            },
        }
    }
}
