use thiserror::Error;

/// Failures of the presence layer.
///
/// None of these reach the end user: presence is best-effort state, callers
/// log and carry on.
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("awareness transport closed")]
    TransportClosed,

    #[error("relay did not send a welcome message")]
    MissingWelcome,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid relay message: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

pub type Result<T> = std::result::Result<T, PresenceError>;
