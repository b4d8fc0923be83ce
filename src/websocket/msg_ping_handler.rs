use tracing::{debug, error};
use std::sync::Arc;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::Mutex;
use crate::models::{PongMessage, ServerMessage};
use chrono::Utc;

/// Handle a ping - reply with the relay's current time.
pub async fn handle_ping_message(doc_id: &str, sender: &Arc<Mutex<SplitSink<WebSocket, Message>>>) {
    debug!("Ping message received for document {}", doc_id);

    let pong = ServerMessage::Pong(PongMessage { date: Utc::now().to_rfc3339() });
    let pong_msg = match serde_json::to_string(&pong) {
        Ok(pong_msg) => pong_msg,
        Err(e) => {
            error!("Failed to encode Pong message for document {}: {}", doc_id, e);
            return;
        }
    };
    if sender.lock().await.send(Message::Text(pong_msg)).await.is_err() {
        error!("Failed to send Pong message for document {}", doc_id);
    }
}
