//! Presence synchronization for collaborative document sessions.
//!
//! Every peer publishes one ephemeral record (identity + cursor) into a shared
//! awareness channel. This module resolves the local identity, keeps the
//! record visible to late joiners and projects remote cursors into
//! decorations for the rendering surface.

pub mod awareness;
pub mod color;
pub mod document;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod liveness;
pub mod projector;
pub mod session;

use std::time::Duration;

pub use awareness::{
    update_local, AwarenessChannel, AwarenessEvent, AwarenessSnapshot, ChangeOrigin,
    ConnectionStatus, CursorRange, PeerRecord, PeerSlot, PeerUser, SlotChange,
};
pub use color::{allocate, ColorToken};
pub use document::DocumentHandle;
pub use error::{PresenceError, Result};
pub use identity::{resolve, IdentityCache, LocalIdentity, UserProfile};
pub use lifecycle::Lifecycle;
pub use liveness::{HostEvent, RebroadcastController, RebroadcastReason};
pub use projector::{project, Decoration, DecorationSet, RenderSurface};
pub use session::{PresenceSession, SessionOptions, Subscriptions};

/// Timing knobs shared by the awareness transports and the rebroadcast controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceConfig {
    /// Backstop re-publish interval.
    pub heartbeat_interval: Duration,
    /// Coalescing window for the peer-growth trigger.
    pub rebroadcast_debounce: Duration,
    /// A slot not refreshed within this window is dropped by the transport.
    pub awareness_timeout: Duration,
    /// How often the in-process transport looks for outdated slots.
    pub sweep_interval: Duration,
    /// Delay between reconnect attempts of the websocket transport.
    pub reconnect_delay: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            rebroadcast_debounce: Duration::from_millis(500),
            awareness_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}
