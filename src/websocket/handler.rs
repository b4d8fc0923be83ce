use std::sync::Arc;
use axum::{
    extract::{Path, State, ws::{Message, WebSocket, WebSocketUpgrade}},
    http::HeaderMap,
    response::Response,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::auth;
use crate::models::{ClientMessage, ServerMessage, SlotState, StateMessage, WelcomeMessage};
use crate::presence::awareness::MemoryAwareness;
use crate::presence::{AwarenessChannel, AwarenessEvent, PeerSlot, SlotChange};
use crate::utils::ScopeGuard;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::websocket::msg_publish_handler::{handle_clear_message, handle_publish_message};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// WebSocket handler
pub async fn websocket_handler(
    Path(doc_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let profile = auth::request_profile(&headers, state.jwt_secret.as_deref());
    info!(
        "New awareness connection attempt for document {} by {}",
        doc_id,
        profile.id.as_deref().unwrap_or("anonymous")
    );
    ws.on_upgrade(move |socket| handle_socket(socket, doc_id, state))
}

fn welcome_message(awareness: &MemoryAwareness) -> ServerMessage {
    let slot = awareness.local_slot();
    let states = awareness
        .states()
        .into_iter()
        .filter(|(s, _)| *s != slot)
        .map(|(slot, record)| SlotState { slot, record })
        .collect();
    ServerMessage::Welcome(WelcomeMessage { slot, states })
}

/// Everything in `event` the client on `own_slot` has not written itself.
fn state_messages(event: AwarenessEvent, own_slot: PeerSlot) -> Vec<ServerMessage> {
    event
        .changes
        .into_iter()
        .filter(|change| change.slot() != own_slot)
        .map(|change| {
            let (slot, record) = match change {
                SlotChange::Added(slot, record) | SlotChange::Updated(slot, record) => (slot, Some(record)),
                SlotChange::Removed(slot) => (slot, None),
            };
            ServerMessage::State(StateMessage { slot, record })
        })
        .collect()
}

async fn send_message(sender: &WsSender, message: &ServerMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode awareness message: {}", e);
            return true;
        }
    };
    sender.lock().await.send(Message::Text(text)).await.is_ok()
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, doc_id: String, state: Arc<AppState>) {
    let room = state.rooms.open(&doc_id).await;
    let awareness = Arc::new(room.connect());
    let slot = awareness.local_slot();
    info!("Awareness connection established for document {} on slot {}", doc_id, slot);

    // The slot disappears for everyone however the connection ends
    let _guard = {
        let awareness = awareness.clone();
        let doc_id = doc_id.clone();
        ScopeGuard::new(move || {
            awareness.clear();
            info!("Awareness connection for document {} slot {} terminated", doc_id, slot);
        })
    };

    let (sender, mut receiver) = socket.split();
    let sender: WsSender = Arc::new(Mutex::new(sender));

    // Subscribe before the welcome so nothing falls in between
    let mut events = awareness.subscribe();
    if !send_message(&sender, &welcome_message(&awareness)).await {
        warn!("Failed to send welcome for document {} slot {}", doc_id, slot);
        return;
    }

    // Client -> relay
    let mut recv_task = {
        let awareness = awareness.clone();
        let sender = sender.clone();
        let doc_id = doc_id.clone();
        let state = state.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(client_msg) => client_msg,
                    Err(e) => {
                        error!("Failed to parse message for document {}: {}", doc_id, e);
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Publish(publish_msg) => {
                        handle_publish_message(publish_msg, &doc_id, &awareness);
                        state.rooms.touch(&doc_id, &room).await;
                    }
                    ClientMessage::Clear => handle_clear_message(&doc_id, &awareness),
                    ClientMessage::Ping => handle_ping_message(&doc_id, &sender).await,
                }
            }
        })
    };

    // Relay -> client
    let mut send_task = {
        let awareness = awareness.clone();
        let doc_id = doc_id.clone();
        tokio::spawn(async move {
            loop {
                let messages = match events.recv().await {
                    Ok(event) => state_messages(event, slot),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Slot {} lagged {} events on document {}, resyncing", slot, skipped, doc_id);
                        vec![welcome_message(&awareness)]
                    }
                    Err(RecvError::Closed) => break,
                };
                for message in &messages {
                    if !send_message(&sender, message).await {
                        return;
                    }
                }
            }
        })
    };

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut recv_task) => send_task.abort(),
        _ = (&mut send_task) => recv_task.abort(),
    };
}
