use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::auth::Identity;
use crate::db::models::Conversation;
use crate::error::ChatResult;
use crate::state::AppState;
use crate::store::conversations::{delete_conversation, set_archived};

/// POST /api/admin/conversations/{id}/archive
pub async fn archive(
    State(state): State<AppState>,
    identity: Identity,
    Path(conversation_id): Path<String>,
) -> ChatResult<Json<Conversation>> {
    set_status(state, identity, conversation_id, true).await
}

/// POST /api/admin/conversations/{id}/unarchive
pub async fn unarchive(
    State(state): State<AppState>,
    identity: Identity,
    Path(conversation_id): Path<String>,
) -> ChatResult<Json<Conversation>> {
    set_status(state, identity, conversation_id, false).await
}

async fn set_status(
    state: AppState,
    identity: Identity,
    conversation_id: String,
    archived: bool,
) -> ChatResult<Json<Conversation>> {
    identity.require_admin()?;
    let conversation = state
        .store
        .run(move |conn| set_archived(conn, &conversation_id, archived))
        .await?;

    tracing::info!(
        user_id = %identity.user_id,
        conversation_id = %conversation.id,
        status = conversation.status.as_str(),
        "Conversation status changed"
    );
    Ok(Json(conversation))
}

/// DELETE /api/admin/conversations/{id}
/// Removes every message and releases the participant pair; the next message between
/// the same parties opens a fresh conversation.
pub async fn delete(
    State(state): State<AppState>,
    identity: Identity,
    Path(conversation_id): Path<String>,
) -> ChatResult<StatusCode> {
    identity.require_admin()?;
    let id = conversation_id.clone();
    let removed = state
        .store
        .run(move |conn| delete_conversation(conn, &id))
        .await?;

    tracing::info!(
        user_id = %identity.user_id,
        conversation_id = %conversation_id,
        messages_removed = removed,
        "Conversation deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}
