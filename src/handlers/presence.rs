use crate::{models::{ErrorResponse, PresenceResponse, SlotState}, AppState};
use axum::{extract::{Path, State}, http::StatusCode, Json};
use std::sync::Arc;
use tracing::debug;

/// Live awareness records of a document
pub async fn doc_presence(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<(StatusCode, Json<PresenceResponse>), (StatusCode, Json<ErrorResponse>)> {
    let Some(room) = state.rooms.get(&doc_id).await else {
        let status = StatusCode::NOT_FOUND;
        return Err((status, Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: format!("No presence room for document '{}'", doc_id),
        })));
    };

    let states: Vec<SlotState> = room
        .states()
        .into_iter()
        .map(|(slot, record)| SlotState { slot, record })
        .collect();
    debug!("Presence requested for document {}: {} record(s)", doc_id, states.len());

    Ok((
        StatusCode::OK,
        Json(PresenceResponse {
            doc_id,
            n_conn: room.member_count() as u32,
            states,
        }),
    ))
}
