//! Remote cursors to visual decorations.
//!
//! Projection is total and stateless: each call rebuilds the full set from the
//! current snapshot and never mutates the document or its history.

use serde::Serialize;

use super::awareness::{AwarenessSnapshot, PeerSlot};
use super::color::ColorToken;

pub const SELECTION_OPACITY: f32 = 0.6;
pub const SELECTION_BORDER_DARKEN: f64 = 15.0;
pub const SELECTION_BORDER_RADIUS: u8 = 2;
const FALLBACK_LABEL: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionStyle {
    pub background: ColorToken,
    pub border: ColorToken,
    pub opacity: f32,
    pub border_radius: u8,
}

impl SelectionStyle {
    pub fn for_color(color: &ColorToken) -> Self {
        Self {
            background: color.clone(),
            border: color.darken(SELECTION_BORDER_DARKEN),
            opacity: SELECTION_OPACITY,
            border_radius: SELECTION_BORDER_RADIUS,
        }
    }
}

/// A purely visual annotation for one remote peer.
///
/// Carets are widgets placed after `position`; surfaces render them without
/// pointer events so they never take part in selection or input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Decoration {
    Selection {
        slot: PeerSlot,
        from: usize,
        to: usize,
        style: SelectionStyle,
    },
    Caret {
        slot: PeerSlot,
        position: usize,
        label: String,
        color: ColorToken,
    },
}

impl Decoration {
    pub fn slot(&self) -> PeerSlot {
        match self {
            Decoration::Selection { slot, .. } | Decoration::Caret { slot, .. } => *slot,
        }
    }
}

/// Everything a surface needs for one render.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DecorationSet {
    pub decorations: Vec<Decoration>,
    /// Always false: decorations stay out of the undo history.
    pub add_to_history: bool,
}

impl DecorationSet {
    pub fn new(decorations: Vec<Decoration>) -> Self {
        Self {
            decorations,
            add_to_history: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }

    pub fn for_slot(&self, slot: PeerSlot) -> impl Iterator<Item = &Decoration> {
        self.decorations.iter().filter(move |d| d.slot() == slot)
    }
}

/// Sink for decoration sets, implemented by the editor surface.
pub trait RenderSurface: Send + Sync {
    fn apply(&self, decorations: DecorationSet);
}

pub fn project(
    snapshot: &AwarenessSnapshot,
    local_slot: PeerSlot,
    document_len: usize,
) -> Vec<Decoration> {
    let mut decorations = Vec::new();
    for (slot, record) in snapshot {
        if *slot == local_slot {
            continue;
        }
        let (Some(user), Some(cursor)) = (&record.user, &record.cursor) else {
            continue;
        };

        let cursor = cursor.clamp(document_len);
        if !cursor.is_collapsed() {
            decorations.push(Decoration::Selection {
                slot: *slot,
                from: cursor.from(),
                to: cursor.to(),
                style: SelectionStyle::for_color(&user.color),
            });
        }

        let label = if user.name.is_empty() {
            FALLBACK_LABEL.to_string()
        } else {
            user.name.clone()
        };
        decorations.push(Decoration::Caret {
            slot: *slot,
            position: cursor.head,
            label,
            color: user.color.clone(),
        });
    }
    decorations
}
