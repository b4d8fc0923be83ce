//! The awareness channel: a last-write-wins map from peer slot to peer record.
//!
//! Each peer writes only its own slot and reads every slot. Slots vanish when
//! the transport loses the peer; that is the transport's job, never the
//! caller's.

pub mod memory;
pub mod remote;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::{broadcast, watch};

use super::color::ColorToken;

pub use memory::{MemoryAwareness, MemoryHub};
pub use remote::WsAwareness;

/// Connection-scoped identifier handed out by the transport.
pub type PeerSlot = u64;

/// Identity half of a peer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUser {
    pub id: String,
    pub name: String,
    pub color: ColorToken,
}

/// A selection expressed as document offsets. `anchor == head` is a caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorRange {
    pub anchor: usize,
    pub head: usize,
}

impl CursorRange {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    pub fn caret(position: usize) -> Self {
        Self::new(position, position)
    }

    pub fn from(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn to(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    pub fn clamp(&self, len: usize) -> Self {
        Self::new(self.anchor.min(len), self.head.min(len))
    }
}

/// What one peer publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(default)]
    pub user: Option<PeerUser>,
    #[serde(default)]
    pub cursor: Option<CursorRange>,
    /// Transient revision written by a rebroadcast and removed right after.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<u64>,
}

impl PeerRecord {
    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.name.as_str())
    }

    pub fn color(&self) -> Option<&ColorToken> {
        self.user.as_ref().map(|u| &u.color)
    }
}

pub type AwarenessSnapshot = BTreeMap<PeerSlot, PeerRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Who caused a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// A write by the peer owning the slot.
    Peer(PeerSlot),
    /// Join, disconnect, timeout or transport loss.
    Transport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotChange {
    Added(PeerSlot, PeerRecord),
    Updated(PeerSlot, PeerRecord),
    Removed(PeerSlot),
}

impl SlotChange {
    pub fn slot(&self) -> PeerSlot {
        match self {
            SlotChange::Added(slot, _) | SlotChange::Updated(slot, _) | SlotChange::Removed(slot) => {
                *slot
            }
        }
    }
}

/// One batch of slot changes, delivered to every observer of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessEvent {
    pub origin: ChangeOrigin,
    pub changes: Vec<SlotChange>,
}

impl AwarenessEvent {
    pub fn new(origin: ChangeOrigin, changes: Vec<SlotChange>) -> Self {
        Self { origin, changes }
    }

    pub fn added(&self) -> Vec<PeerSlot> {
        self.slots(|c| matches!(c, SlotChange::Added(..)))
    }

    pub fn updated(&self) -> Vec<PeerSlot> {
        self.slots(|c| matches!(c, SlotChange::Updated(..)))
    }

    pub fn removed(&self) -> Vec<PeerSlot> {
        self.slots(|c| matches!(c, SlotChange::Removed(..)))
    }

    pub fn touches(&self, slot: PeerSlot) -> bool {
        self.changes.iter().any(|c| c.slot() == slot)
    }

    fn slots(&self, pred: impl Fn(&SlotChange) -> bool) -> Vec<PeerSlot> {
        self.changes.iter().filter(|c| pred(c)).map(SlotChange::slot).collect()
    }
}

/// Contract every awareness transport fulfils.
///
/// Writes are value-diffed: publishing a record equal to the current one is
/// not observable. Use a marker revision when a write must be seen anyway.
pub trait AwarenessChannel: Send + Sync {
    /// Slot of the local peer on the current connection.
    fn local_slot(&self) -> PeerSlot;

    /// Last record the local peer published, kept across disconnects.
    fn local_state(&self) -> Option<PeerRecord>;

    /// Every record currently visible, the local one included.
    fn states(&self) -> AwarenessSnapshot;

    /// Overwrite the whole local record.
    fn publish(&self, record: PeerRecord);

    /// Remove the local record so other peers drop the slot.
    fn clear(&self);

    fn subscribe(&self) -> broadcast::Receiver<AwarenessEvent>;

    fn status(&self) -> watch::Receiver<ConnectionStatus>;

    fn slot_count(&self) -> usize {
        self.states().len()
    }
}

/// Read-modify-write of the local record.
///
/// Partial updates must go through here so that writing the cursor keeps the
/// user fields and the other way round.
pub fn update_local(channel: &dyn AwarenessChannel, f: impl FnOnce(&mut PeerRecord)) {
    let mut record = channel.local_state().unwrap_or_default();
    f(&mut record);
    channel.publish(record);
}

/// Compute the change needed to move `slot` from `current` to `next`.
pub(crate) fn diff_slot(
    slot: PeerSlot,
    current: Option<&PeerRecord>,
    next: Option<&PeerRecord>,
) -> Option<SlotChange> {
    match (current, next) {
        (None, Some(next)) => Some(SlotChange::Added(slot, next.clone())),
        (Some(current), Some(next)) if current != next => {
            Some(SlotChange::Updated(slot, next.clone()))
        }
        (Some(_), None) => Some(SlotChange::Removed(slot)),
        _ => None,
    }
}
