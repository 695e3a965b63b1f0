//! REST endpoints for conversations, history and the synchronous send/ack fallbacks.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::{router, status};
use crate::auth::Identity;
use crate::db::models::Message;
use crate::error::ChatResult;
use crate::state::AppState;
use crate::store::conversations::{list_for, ConversationFilter, ConversationSummary};
use crate::store::messages::{history, HistoryPage};
use crate::ws::SendMessagePayload;

#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    pub filter: Option<ConversationFilter>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Message id cursor: return messages older than this one.
    pub before: Option<String>,
    pub limit: Option<u32>,
}

/// GET /api/conversations?filter=active|archived|unread
pub async fn list_conversations(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<ConversationListQuery>,
) -> ChatResult<Json<Vec<ConversationSummary>>> {
    let summaries = state
        .store
        .run(move |conn| list_for(conn, &identity, query.filter))
        .await?;
    Ok(Json(summaries))
}

/// GET /api/conversations/{id}/messages?before=&limit=
pub async fn get_history(
    State(state): State<AppState>,
    identity: Identity,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ChatResult<Json<HistoryPage>> {
    let limit = state.realtime.page_size(query.limit);
    let page = state
        .store
        .run(move |conn| history(conn, &conversation_id, &identity, query.before.as_deref(), limit))
        .await?;
    Ok(Json(page))
}

/// POST /api/messages
/// Same path as the `sendMessage` event, without a connection to exclude from the echo.
pub async fn send(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<SendMessagePayload>,
) -> ChatResult<(StatusCode, Json<Message>)> {
    let target = body.target()?;
    let message = router::send_message(&state, &identity, target, body.content, None).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /api/messages/{id}/delivered
pub async fn mark_delivered(
    State(state): State<AppState>,
    identity: Identity,
    Path(message_id): Path<String>,
) -> ChatResult<StatusCode> {
    status::mark_delivered(&state, &identity, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/conversations/{id}/read
/// Returns the ids that moved to `read`; empty on a repeat call.
pub async fn mark_read(
    State(state): State<AppState>,
    identity: Identity,
    Path(conversation_id): Path<String>,
) -> ChatResult<Json<serde_json::Value>> {
    let changes = status::mark_read(&state, &identity, conversation_id).await?;
    let ids: Vec<String> = changes.into_iter().map(|c| c.message_id).collect();
    Ok(Json(serde_json::json!({ "updated": ids })))
}
