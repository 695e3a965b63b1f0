//! Status Transition Engine: forward-only `sent → delivered → read`.
//!
//! The store applies each transition as a conditional update; this layer only announces
//! the rows that actually changed.

use crate::auth::Identity;
use crate::db::models::MessageStatus;
use crate::error::ChatResult;
use crate::state::AppState;
use crate::store::messages::{self, DeliveredOutcome, StatusChange};
use crate::ws::{ConnectionRegistry, Room, ServerEvent, StatusUpdate};

/// Recipient acknowledged receipt of one message.
/// Returns the committed change, or `None` when the message had already moved past `sent`.
pub async fn mark_delivered(
    state: &AppState,
    reader: &Identity,
    message_id: String,
) -> ChatResult<Option<StatusChange>> {
    let who = reader.clone();
    let id = message_id.clone();
    let outcome = state
        .store
        .run(move |conn| messages::mark_delivered(conn, &id, &who))
        .await?;

    match outcome {
        DeliveredOutcome::Advanced(change) => {
            publish_status_changes(state.registry.as_ref(), reader, std::slice::from_ref(&change));
            tracing::debug!(
                user_id = %reader.user_id,
                message_id = %change.message_id,
                "Message delivered"
            );
            Ok(Some(change))
        }
        DeliveredOutcome::Unchanged {
            current: MessageStatus::Read,
        } => {
            tracing::debug!(message_id = %message_id, "Late delivered ack for a read message dropped");
            Ok(None)
        }
        DeliveredOutcome::Unchanged { .. } => Ok(None),
    }
}

/// Reader opened the conversation: everything addressed to them becomes `read`.
/// A repeat call changes nothing and publishes nothing.
pub async fn mark_read(
    state: &AppState,
    reader: &Identity,
    conversation_id: String,
) -> ChatResult<Vec<StatusChange>> {
    let who = reader.clone();
    let id = conversation_id.clone();
    let changes = state
        .store
        .run(move |conn| messages::mark_read(conn, &id, &who))
        .await?;

    if !changes.is_empty() {
        publish_status_changes(state.registry.as_ref(), reader, &changes);
        tracing::debug!(
            user_id = %reader.user_id,
            conversation_id = %conversation_id,
            count = changes.len(),
            "Messages marked read"
        );
    }
    Ok(changes)
}

/// Each change goes to the original sender's room and to the reader's own room, so the
/// reader's other tabs converge as well.
fn publish_status_changes(registry: &dyn ConnectionRegistry, reader: &Identity, changes: &[StatusChange]) {
    let reader_room = Room::of_party(&reader.user_id, reader.role);
    for change in changes {
        let event = ServerEvent::MessageStatusUpdated(StatusUpdate {
            message_id: change.message_id.clone(),
            status: change.status,
        });
        let sender_room = Room::of_party(&change.sender_id, change.sender_type);
        registry.publish(&[sender_room, reader_room.clone()], &event, None);
    }
}
