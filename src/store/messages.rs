//! Message rows and the conditional status updates behind the delivery state machine.
//!
//! Transitions are compare-and-set: each `UPDATE` carries the current-status predicate, so
//! concurrent acknowledgements for one message converge on the highest status regardless
//! of arrival order.

use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::conversations::{find_or_create, get_conversation, touch, ParticipantPair};
use super::ADDRESSED_TO_READER;
use crate::auth::Identity;
use crate::db::models::{Conversation, ConversationStatus, Message, MessageStatus, Recipient, Role};
use crate::db::now_timestamp;
use crate::error::{ChatError, ChatResult};

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.sender_type, m.recipient_id,
     m.recipient_type, m.content, m.status, m.is_read, m.created_at";

/// Where a new message goes: an existing conversation, or the conversation for a pair.
#[derive(Debug, Clone)]
pub enum NewMessageTarget {
    Conversation(String),
    Recipient(Recipient),
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender: Identity,
    pub target: NewMessageTarget,
    pub content: String,
}

/// A committed status change, with the original sender so the change can be announced
/// to the sender's room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusChange {
    pub message_id: String,
    pub conversation_id: String,
    pub status: MessageStatus,
    pub sender_id: String,
    pub sender_type: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveredOutcome {
    Advanced(StatusChange),
    /// The message was already at `current`; nothing changed.
    Unchanged { current: MessageStatus },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_type: row.get(3)?,
        recipient_id: row.get(4)?,
        recipient_type: row.get(5)?,
        content: row.get(6)?,
        status: row.get(7)?,
        is_read: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn status_change_from_row(row: &Row<'_>) -> rusqlite::Result<StatusChange> {
    Ok(StatusChange {
        message_id: row.get(0)?,
        conversation_id: row.get(1)?,
        status: row.get(2)?,
        sender_id: row.get(3)?,
        sender_type: row.get(4)?,
    })
}

/// Load a conversation the reader takes part in. Tombstones and strangers both read as
/// "not resolvable" so callers cannot probe for ids.
fn participant_conversation(
    conn: &Connection,
    conversation_id: &str,
    who: &Identity,
) -> ChatResult<Option<Conversation>> {
    Ok(get_conversation(conn, conversation_id)?.filter(|c| {
        c.status != ConversationStatus::Deleted && c.has_participant(&who.user_id, who.role)
    }))
}

/// Resolve the conversation, persist the message and bump activity in one transaction.
/// Returns the stored message and the recipient it was addressed to.
pub fn insert_message(conn: &mut Connection, new: &NewMessage) -> ChatResult<(Message, Recipient)> {
    let tx = conn.transaction()?;

    let (conversation, recipient) = match &new.target {
        NewMessageTarget::Conversation(id) => {
            let conversation = participant_conversation(&tx, id, &new.sender)?.ok_or_else(|| {
                ChatError::ConversationResolutionFailed(format!("conversation {} not available", id))
            })?;
            let recipient = conversation.counterpart_of(new.sender.role).ok_or_else(|| {
                ChatError::ConversationResolutionFailed("conversation has no counterpart".to_string())
            })?;
            (conversation, recipient)
        }
        NewMessageTarget::Recipient(recipient) => {
            let pair = ParticipantPair::between(&new.sender, recipient)?;
            if let Recipient::SpecificUser { id, role } = recipient {
                if !super::members::member_has_role(&tx, id, *role)? {
                    return Err(ChatError::ConversationResolutionFailed(format!(
                        "unknown {} {}",
                        role, id
                    )));
                }
            }
            (find_or_create(&tx, &pair)?, recipient.clone())
        }
    };

    let message = Message {
        id: Uuid::now_v7().to_string(),
        conversation_id: conversation.id.clone(),
        sender_id: new.sender.user_id.clone(),
        sender_type: new.sender.role,
        recipient_id: recipient.id().map(str::to_string),
        recipient_type: recipient.role(),
        content: new.content.clone(),
        status: MessageStatus::Sent,
        is_read: false,
        created_at: now_timestamp(),
    };

    tx.execute(
        "INSERT INTO messages (id, conversation_id, sender_id, sender_type, recipient_id,
                               recipient_type, content, status, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'sent', 0, ?8)",
        params![
            message.id,
            message.conversation_id,
            message.sender_id,
            message.sender_type,
            message.recipient_id,
            message.recipient_type,
            message.content,
            message.created_at,
        ],
    )?;
    touch(&tx, &conversation.id, &message.created_at)?;
    tx.commit()?;

    Ok((message, recipient))
}

pub fn get_message(conn: &Connection, id: &str) -> ChatResult<Option<Message>> {
    let sql = format!("SELECT {} FROM messages m WHERE m.id = ?1", MESSAGE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], message_from_row).optional()?)
}

/// `sent → delivered`, only when the message is exactly `sent` and addressed to `reader`.
pub fn mark_delivered(
    conn: &Connection,
    message_id: &str,
    reader: &Identity,
) -> ChatResult<DeliveredOutcome> {
    let sql = format!(
        "UPDATE messages AS m SET status = 'delivered'
         WHERE m.id = :id AND m.status = 'sent' AND {}
         RETURNING id, conversation_id, status, sender_id, sender_type",
        ADDRESSED_TO_READER
    );
    let changed = conn
        .query_row(
            &sql,
            named_params! { ":id": message_id, ":user": reader.user_id, ":role": reader.role },
            status_change_from_row,
        )
        .optional()?;

    if let Some(change) = changed {
        return Ok(DeliveredOutcome::Advanced(change));
    }

    // Nothing changed: either the message is not ours to acknowledge or it already moved on.
    let sql = format!(
        "SELECT m.status, COALESCE({}, 0) FROM messages m WHERE m.id = :id",
        ADDRESSED_TO_READER
    );
    let current: Option<(MessageStatus, bool)> = conn
        .query_row(
            &sql,
            named_params! { ":id": message_id, ":user": reader.user_id, ":role": reader.role },
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match current {
        None => Err(ChatError::NotFound("message")),
        Some((_, false)) => Err(ChatError::Forbidden("message is not addressed to you")),
        Some((current, true)) => Ok(DeliveredOutcome::Unchanged { current }),
    }
}

/// Advance every message in the conversation addressed to `reader` to `read`, as one
/// statement. Already-read messages are untouched, so a repeat call returns nothing.
pub fn mark_read(
    conn: &Connection,
    conversation_id: &str,
    reader: &Identity,
) -> ChatResult<Vec<StatusChange>> {
    if participant_conversation(conn, conversation_id, reader)?.is_none() {
        return Err(ChatError::NotFound("conversation"));
    }

    let sql = format!(
        "UPDATE messages AS m SET status = 'read', is_read = 1
         WHERE m.conversation_id = :conversation AND m.status != 'read' AND {}
         RETURNING id, conversation_id, status, sender_id, sender_type",
        ADDRESSED_TO_READER
    );
    let mut stmt = conn.prepare(&sql)?;
    let changes = stmt
        .query_map(
            named_params! {
                ":conversation": conversation_id,
                ":user": reader.user_id,
                ":role": reader.role,
            },
            status_change_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(changes)
}

/// Page of history, oldest first. `before` is a message id cursor: the page holds the
/// newest `limit` messages strictly older than it. A cursor outside the conversation
/// is `NotFound`.
pub fn history(
    conn: &Connection,
    conversation_id: &str,
    reader: &Identity,
    before: Option<&str>,
    limit: u32,
) -> ChatResult<HistoryPage> {
    if participant_conversation(conn, conversation_id, reader)?.is_none() {
        return Err(ChatError::NotFound("conversation"));
    }
    if let Some(cursor) = before {
        let in_conversation = get_message(conn, cursor)?
            .is_some_and(|m| m.conversation_id == conversation_id);
        if !in_conversation {
            return Err(ChatError::NotFound("message"));
        }
    }

    let sql = format!(
        "SELECT {} FROM messages m
         WHERE m.conversation_id = :conversation
           AND (:before IS NULL OR (m.created_at, m.id) <
                (SELECT b.created_at, b.id FROM messages b WHERE b.id = :before))
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT :limit",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut messages = stmt
        .query_map(
            named_params! {
                ":conversation": conversation_id,
                ":before": before,
                ":limit": i64::from(limit) + 1,
            },
            message_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let has_more = messages.len() > limit as usize;
    messages.truncate(limit as usize);
    messages.reverse();

    Ok(HistoryPage { messages, has_more })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{seed_member, temp_store};
    use crate::store::ConversationStore;

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            user_id: id.to_string(),
            role,
        }
    }

    async fn send(store: &ConversationStore, sender: Identity, target: NewMessageTarget, text: &str) -> Message {
        let new = NewMessage {
            sender,
            target,
            content: text.to_string(),
        };
        store
            .run(move |conn| insert_message(conn, &new))
            .await
            .expect("insert message")
            .0
    }

    async fn status_of(store: &ConversationStore, id: &str) -> MessageStatus {
        let id = id.to_string();
        store
            .run(move |conn| get_message(conn, &id))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_insert_bumps_activity_and_starts_sent() {
        let (store, _dir) = temp_store();
        seed_member(&store, "psy-1", Role::Psychologist, None).await;
        let patient = identity("pat-1", Role::Patient);

        let msg = send(
            &store,
            patient,
            NewMessageTarget::Recipient(Recipient::SpecificUser {
                id: "psy-1".into(),
                role: Role::Psychologist,
            }),
            "hello",
        )
        .await;

        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(!msg.is_read);
        assert_eq!(msg.recipient_id.as_deref(), Some("psy-1"));

        let conv_id = msg.conversation_id.clone();
        let conv = store
            .run(move |conn| get_conversation(conn, &conv_id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conv.updated_at, msg.created_at);
    }

    #[tokio::test]
    async fn test_failed_resolution_persists_nothing() {
        let (store, _dir) = temp_store();
        let patient = identity("pat-1", Role::Patient);

        // Unknown psychologist
        let new = NewMessage {
            sender: patient.clone(),
            target: NewMessageTarget::Recipient(Recipient::SpecificUser {
                id: "ghost".into(),
                role: Role::Psychologist,
            }),
            content: "hi".into(),
        };
        let result = store.run(move |conn| insert_message(conn, &new)).await;
        assert!(matches!(result, Err(ChatError::ConversationResolutionFailed(_))));

        // Unknown conversation
        let new = NewMessage {
            sender: patient,
            target: NewMessageTarget::Conversation("missing".into()),
            content: "hi".into(),
        };
        let result = store.run(move |conn| insert_message(conn, &new)).await;
        assert!(matches!(result, Err(ChatError::ConversationResolutionFailed(_))));

        let counts: (i64, i64) = store
            .run(|conn| {
                Ok(conn.query_row(
                    "SELECT (SELECT COUNT(*) FROM conversations), (SELECT COUNT(*) FROM messages)",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(counts, (0, 0));
    }

    #[tokio::test]
    async fn test_status_never_regresses_in_any_order() {
        let (store, _dir) = temp_store();
        let patient = identity("pat-1", Role::Patient);
        let admin = identity("adm-1", Role::Admin);

        // read then a late delivered ack
        let msg = send(&store, patient.clone(), NewMessageTarget::Recipient(Recipient::AdministrationDesk), "one").await;
        let conv_id = msg.conversation_id.clone();
        let reader = admin.clone();
        let read = store
            .run(move |conn| mark_read(conn, &conv_id, &reader))
            .await
            .unwrap();
        assert_eq!(read.len(), 1);

        let id = msg.id.clone();
        let reader = admin.clone();
        let late = store
            .run(move |conn| mark_delivered(conn, &id, &reader))
            .await
            .unwrap();
        assert_eq!(late, DeliveredOutcome::Unchanged { current: MessageStatus::Read });
        assert_eq!(status_of(&store, &msg.id).await, MessageStatus::Read);

        // delivered twice, concurrently
        let msg = send(&store, patient, NewMessageTarget::Recipient(Recipient::AdministrationDesk), "two").await;
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let id = msg.id.clone();
            let reader = admin.clone();
            handles.push(tokio::spawn(async move {
                store.run(move |conn| mark_delivered(conn, &id, &reader)).await
            }));
        }
        let mut advanced = 0;
        for handle in handles {
            if let DeliveredOutcome::Advanced(_) = handle.await.unwrap().unwrap() {
                advanced += 1;
            }
        }
        assert_eq!(advanced, 1, "exactly one acknowledgement flips the status");
        assert_eq!(status_of(&store, &msg.id).await, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_delivered_requires_the_addressee() {
        let (store, _dir) = temp_store();
        seed_member(&store, "psy-1", Role::Psychologist, None).await;
        let patient = identity("pat-1", Role::Patient);

        let msg = send(
            &store,
            patient.clone(),
            NewMessageTarget::Recipient(Recipient::SpecificUser {
                id: "psy-1".into(),
                role: Role::Psychologist,
            }),
            "hi",
        )
        .await;

        let id = msg.id.clone();
        let result = store
            .run(move |conn| mark_delivered(conn, &id, &patient))
            .await;
        assert!(matches!(result, Err(ChatError::Forbidden(_))));

        let result = store
            .run(|conn| mark_delivered(conn, "nope", &identity("psy-1", Role::Psychologist)))
            .await;
        assert!(matches!(result, Err(ChatError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bulk_read_is_idempotent_and_only_touches_reader_messages() {
        let (store, _dir) = temp_store();
        seed_member(&store, "pat-1", Role::Patient, None).await;
        seed_member(&store, "psy-1", Role::Psychologist, None).await;
        let patient = identity("pat-1", Role::Patient);
        let psychologist = identity("psy-1", Role::Psychologist);

        let to_psy = Recipient::SpecificUser {
            id: "psy-1".into(),
            role: Role::Psychologist,
        };
        let first = send(&store, patient.clone(), NewMessageTarget::Recipient(to_psy.clone()), "a").await;
        send(&store, patient.clone(), NewMessageTarget::Recipient(to_psy), "b").await;
        let reply = send(
            &store,
            psychologist.clone(),
            NewMessageTarget::Conversation(first.conversation_id.clone()),
            "c",
        )
        .await;

        let conv = first.conversation_id.clone();
        let reader = psychologist.clone();
        let changes = store
            .run(move |conn| mark_read(conn, &conv, &reader))
            .await
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.sender_id == "pat-1" && c.status == MessageStatus::Read));

        let conv = first.conversation_id.clone();
        let again = store
            .run(move |conn| mark_read(conn, &conv, &psychologist))
            .await
            .unwrap();
        assert!(again.is_empty());

        // The psychologist's own reply is addressed to the patient and stays unread.
        assert_eq!(status_of(&store, &reply.id).await, MessageStatus::Sent);
        let msg = store
            .run(move |conn| get_message(conn, &first.id))
            .await
            .unwrap()
            .unwrap();
        assert!(msg.is_read);
    }

    #[tokio::test]
    async fn test_history_pages_ascending() {
        let (store, _dir) = temp_store();
        let patient = identity("pat-1", Role::Patient);

        let mut sent = Vec::new();
        for i in 0..5 {
            sent.push(
                send(
                    &store,
                    patient.clone(),
                    NewMessageTarget::Recipient(Recipient::AdministrationDesk),
                    &format!("m{}", i),
                )
                .await,
            );
        }
        let conv = sent[0].conversation_id.clone();

        let reader = patient.clone();
        let conv_id = conv.clone();
        let latest = store
            .run(move |conn| history(conn, &conv_id, &reader, None, 3))
            .await
            .unwrap();
        let contents: Vec<_> = latest.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
        assert!(latest.has_more);

        let cursor = latest.messages[0].id.clone();
        let older = store
            .run(move |conn| history(conn, &conv, &patient, Some(&cursor), 3))
            .await
            .unwrap();
        let contents: Vec<_> = older.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1"]);
        assert!(!older.has_more);
    }

    #[tokio::test]
    async fn test_history_rejects_foreign_or_unknown_cursor() {
        let (store, _dir) = temp_store();
        let patient = identity("pat-1", Role::Patient);
        let mine = send(
            &store,
            patient.clone(),
            NewMessageTarget::Recipient(Recipient::AdministrationDesk),
            "mine",
        )
        .await;
        let theirs = send(
            &store,
            identity("pat-2", Role::Patient),
            NewMessageTarget::Recipient(Recipient::AdministrationDesk),
            "theirs",
        )
        .await;

        for cursor in [theirs.id.clone(), "no-such-message".to_string()] {
            let conv = mine.conversation_id.clone();
            let reader = patient.clone();
            let err = store
                .run(move |conn| history(conn, &conv, &reader, Some(&cursor), 10))
                .await
                .unwrap_err();
            assert!(matches!(err, ChatError::NotFound("message")));
        }
    }
}
