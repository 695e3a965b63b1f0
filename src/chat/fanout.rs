//! Broadcast Fanout: one administration message, many individual conversations.

use serde::{Deserialize, Serialize};

use super::router::send_message;
use crate::auth::Identity;
use crate::db::models::Recipient;
use crate::error::{ChatError, ChatResult};
use crate::state::AppState;
use crate::store::members::{resolve_group, GroupSelector};
use crate::store::messages::NewMessageTarget;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub group: GroupSelector,
    pub content: String,
}

/// Tally of a broadcast. Every recipient is either counted in `sent` or listed in `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub attempted: usize,
    pub sent: usize,
    pub failed: Vec<BroadcastFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastFailure {
    pub recipient_id: String,
    pub error: String,
}

/// Resolve the group and run a normal send to each member from the administration desk.
/// Sends are independent: one failure never stops the rest.
pub async fn broadcast(
    state: &AppState,
    admin: &Identity,
    selector: GroupSelector,
    content: String,
) -> ChatResult<BroadcastReport> {
    admin.require_admin()?;
    if content.trim().is_empty() {
        return Err(ChatError::InvalidRequest("message content is empty".to_string()));
    }

    let group = state
        .store
        .run(move |conn| resolve_group(conn, &selector))
        .await?;

    let mut report = BroadcastReport {
        attempted: group.members.len() + group.unresolved.len(),
        ..Default::default()
    };

    for id in group.unresolved {
        report.failed.push(BroadcastFailure {
            recipient_id: id,
            error: "unknown recipient".to_string(),
        });
    }

    for member in group.members {
        let target = NewMessageTarget::Recipient(Recipient::SpecificUser {
            id: member.id.clone(),
            role: member.role,
        });
        match send_message(state, admin, target, content.clone(), None).await {
            Ok(_) => report.sent += 1,
            Err(e) => {
                tracing::warn!(recipient_id = %member.id, error = %e, "Broadcast send failed");
                report.failed.push(BroadcastFailure {
                    recipient_id: member.id,
                    error: e.public_message(),
                });
            }
        }
    }

    tracing::info!(
        user_id = %admin.user_id,
        attempted = report.attempted,
        sent = report.sent,
        failed = report.failed.len(),
        "Broadcast finished"
    );
    Ok(report)
}
