use loro::LoroDoc;
use std::sync::Arc;

use super::awareness::CursorRange;

/// Text container holding the document body.
pub const CONTENT_CONTAINER: &str = "content";

/// Read-only view of the replicated document.
///
/// Presence never writes through this handle; content changes come from the
/// replication layer only.
#[derive(Clone)]
pub struct DocumentHandle {
    doc: Arc<LoroDoc>,
}

impl DocumentHandle {
    pub fn new(doc: LoroDoc) -> Self {
        Self { doc: Arc::new(doc) }
    }

    pub fn doc(&self) -> &LoroDoc {
        &self.doc
    }

    /// Length of the body in unicode scalar values.
    pub fn len(&self) -> usize {
        self.doc.get_text(CONTENT_CONTAINER).len_unicode()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clamp(&self, range: CursorRange) -> CursorRange {
        range.clamp(self.len())
    }
}
