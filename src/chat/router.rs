//! Message Router: persist first, then fan the message out to whoever is connected.

use crate::auth::Identity;
use crate::db::models::{Message, Recipient};
use crate::error::{ChatError, ChatResult};
use crate::state::AppState;
use crate::store::messages::{insert_message, NewMessage, NewMessageTarget};
use crate::ws::{ConnectionId, ConnectionRegistry, ConversationUpdate, Room, ServerEvent};

/// Send one message.
///
/// Conversation resolution, the insert and the activity bump commit together before
/// anything is published, so a failed send leaves no trace and a published message is
/// always durable. `origin` is the initiating WebSocket connection, excluded from the
/// sender echo because it gets the message back in its ack instead.
pub async fn send_message(
    state: &AppState,
    sender: &Identity,
    target: NewMessageTarget,
    content: String,
    origin: Option<ConnectionId>,
) -> ChatResult<Message> {
    if content.trim().is_empty() {
        return Err(ChatError::InvalidRequest("message content is empty".to_string()));
    }

    let new = NewMessage {
        sender: sender.clone(),
        target,
        content,
    };
    let (message, recipient) = state
        .store
        .run(move |conn| insert_message(conn, &new))
        .await?;

    let reached = publish_new_message(state.registry.as_ref(), sender, &recipient, &message, origin);

    tracing::info!(
        user_id = %sender.user_id,
        conversation_id = %message.conversation_id,
        message_id = %message.id,
        recipient_connections = reached,
        "Message sent"
    );
    if reached == 0 {
        tracing::debug!(
            message_id = %message.id,
            "Recipient offline, message kept for history"
        );
    }

    Ok(message)
}

/// Publish a freshly persisted message. Returns how many recipient connections got it.
fn publish_new_message(
    registry: &dyn ConnectionRegistry,
    sender: &Identity,
    recipient: &Recipient,
    message: &Message,
    origin: Option<ConnectionId>,
) -> usize {
    let recipient_room = registry.resolve_rooms_for(recipient);
    let sender_room = Room::of_party(&sender.user_id, sender.role);

    let receive = ServerEvent::ReceiveMessage(message.clone());
    let reached = registry.publish(std::slice::from_ref(&recipient_room), &receive, None);

    let updated = ServerEvent::ConversationUpdated(ConversationUpdate {
        id: message.conversation_id.clone(),
        last_message: message.clone(),
    });
    registry.publish(&[recipient_room, sender_room.clone()], &updated, None);

    // Sender's other tabs and devices, or the other admin operators.
    registry.publish(&[sender_room], &receive, origin);

    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::test_support::{connect, drain, identity, temp_state};
    use crate::db::models::{MessageStatus, Role};
    use crate::store::test_support::seed_member;

    #[tokio::test]
    async fn test_send_publishes_to_recipient_and_echoes_to_other_tabs() {
        let (state, _dir) = temp_state();
        seed_member(&state.store, "psy-1", Role::Psychologist, None).await;
        let patient = identity("pat-1", Role::Patient);
        let psychologist = identity("psy-1", Role::Psychologist);

        let (origin, mut origin_rx) = connect(&state, &patient);
        let (_tab, mut tab_rx) = connect(&state, &patient);
        let (_psy, mut psy_rx) = connect(&state, &psychologist);

        let message = send_message(
            &state,
            &patient,
            NewMessageTarget::Recipient(Recipient::SpecificUser {
                id: "psy-1".into(),
                role: Role::Psychologist,
            }),
            "Bom dia".into(),
            Some(origin),
        )
        .await
        .unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert!(!message.is_read);

        let psy_events = drain(&mut psy_rx);
        assert!(psy_events.contains(&ServerEvent::ReceiveMessage(message.clone())));
        assert!(psy_events
            .iter()
            .any(|e| matches!(e, ServerEvent::ConversationUpdated(u) if u.id == message.conversation_id)));

        // The initiating tab only sees the sidebar hint.
        let origin_events = drain(&mut origin_rx);
        assert!(!origin_events
            .iter()
            .any(|e| matches!(e, ServerEvent::ReceiveMessage(_))));

        let tab_events = drain(&mut tab_rx);
        assert!(tab_events.contains(&ServerEvent::ReceiveMessage(message)));
    }

    #[tokio::test]
    async fn test_admin_send_echoes_to_other_operators() {
        let (state, _dir) = temp_state();
        seed_member(&state.store, "pat-1", Role::Patient, None).await;
        let admin = identity("adm-1", Role::Admin);
        let (origin, mut origin_rx) = connect(&state, &admin);
        let (_colleague, mut colleague_rx) = connect(&state, &identity("adm-2", Role::Admin));

        let message = send_message(
            &state,
            &admin,
            NewMessageTarget::Recipient(Recipient::SpecificUser {
                id: "pat-1".into(),
                role: Role::Patient,
            }),
            "Olá".into(),
            Some(origin),
        )
        .await
        .unwrap();

        assert!(drain(&mut colleague_rx).contains(&ServerEvent::ReceiveMessage(message)));
        assert!(!drain(&mut origin_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::ReceiveMessage(_))));
    }

    #[tokio::test]
    async fn test_blank_content_is_rejected_before_storage() {
        let (state, _dir) = temp_state();
        let err = send_message(
            &state,
            &identity("pat-1", Role::Patient),
            NewMessageTarget::Recipient(Recipient::AdministrationDesk),
            "   ".into(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_offline_recipient_still_gets_history() {
        let (state, _dir) = temp_state();
        let patient = identity("pat-1", Role::Patient);
        let message = send_message(
            &state,
            &patient,
            NewMessageTarget::Recipient(Recipient::AdministrationDesk),
            "anyone there?".into(),
            None,
        )
        .await
        .unwrap();

        let admin = identity("adm-1", Role::Admin);
        let conversation_id = message.conversation_id.clone();
        let page = state
            .store
            .run(move |conn| crate::store::messages::history(conn, &conversation_id, &admin, None, 50))
            .await
            .unwrap();
        assert_eq!(page.messages, vec![message]);
    }
}
