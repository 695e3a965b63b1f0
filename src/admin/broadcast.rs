use axum::{extract::State, Json};

use crate::auth::Identity;
use crate::chat::fanout::{self, BroadcastReport, BroadcastRequest};
use crate::error::ChatResult;
use crate::state::AppState;

/// POST /api/admin/broadcast
/// Partial failure is still a 200: the report lists who did not get the message.
pub async fn broadcast(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<BroadcastRequest>,
) -> ChatResult<Json<BroadcastReport>> {
    let report = fanout::broadcast(&state, &identity, req.group, req.content).await?;
    Ok(Json(report))
}
