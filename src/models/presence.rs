use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::SlotState;

/// Live awareness records of one document
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PresenceResponse {
    pub doc_id: String,
    pub n_conn: u32,
    pub states: Vec<SlotState>,
}
