use tracing::debug;

use crate::models::PublishMessage;
use crate::presence::awareness::MemoryAwareness;
use crate::presence::AwarenessChannel;

/// Handle PublishMessage - the client's record replaces its slot.
pub fn handle_publish_message(publish_msg: PublishMessage, doc_id: &str, awareness: &MemoryAwareness) {
    debug!(
        "Publish on document {} slot {} by {:?}",
        doc_id,
        awareness.local_slot(),
        publish_msg.record.display_name()
    );
    awareness.publish(publish_msg.record);
}

/// Handle a clear - the client's slot disappears for every peer.
pub fn handle_clear_message(doc_id: &str, awareness: &MemoryAwareness) {
    debug!("Clear on document {} slot {}", doc_id, awareness.local_slot());
    awareness.clear();
}
