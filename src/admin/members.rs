use axum::{extract::State, http::StatusCode, Json};

use crate::auth::Identity;
use crate::db::models::Member;
use crate::error::{ChatError, ChatResult};
use crate::state::AppState;
use crate::store::members::upsert_member;

/// PUT /api/admin/members
/// Directory feed from the profile system. Upserts every entry in one transaction.
pub async fn upsert_members(
    State(state): State<AppState>,
    identity: Identity,
    Json(members): Json<Vec<Member>>,
) -> ChatResult<StatusCode> {
    identity.require_admin()?;
    if let Some(bad) = members.iter().find(|m| m.id.trim().is_empty()) {
        return Err(ChatError::InvalidRequest(format!(
            "member id must not be empty (display name '{}')",
            bad.display_name
        )));
    }

    let count = members.len();
    state
        .store
        .run(move |conn| {
            let tx = conn.transaction()?;
            for member in &members {
                upsert_member(&tx, member)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

    tracing::info!(user_id = %identity.user_id, count, "Member directory updated");
    Ok(StatusCode::NO_CONTENT)
}
