//! Conversation rows: atomic find-or-create, lifecycle transitions, and per-reader listings.

use rusqlite::{named_params, params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ADDRESSED_TO_READER;
use crate::auth::Identity;
use crate::db::models::{Conversation, ConversationStatus, Recipient, Role};
use crate::db::now_timestamp;
use crate::error::{ChatError, ChatResult};

const CONVERSATION_COLUMNS: &str =
    "c.id, c.psychologist_id, c.patient_id, c.status, c.created_at, c.updated_at";

/// The two participant slots of a conversation. `None` is the administration desk.
/// Slots are typed by role, so the pair is already normalized: both sides of a first
/// contact derive the same value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantPair {
    pub psychologist_id: Option<String>,
    pub patient_id: Option<String>,
}

impl ParticipantPair {
    /// Derive the pair for `sender` writing to `recipient`.
    pub fn between(sender: &Identity, recipient: &Recipient) -> ChatResult<Self> {
        let fail = |reason: &str| Err(ChatError::ConversationResolutionFailed(reason.to_string()));

        if let Recipient::SpecificUser { id, .. } = recipient {
            if *id == sender.user_id {
                return fail("cannot message yourself");
            }
        }

        match (sender.role, recipient) {
            (Role::Patient, Recipient::SpecificUser { id, role: Role::Psychologist }) => Ok(Self {
                psychologist_id: Some(id.clone()),
                patient_id: Some(sender.user_id.clone()),
            }),
            (Role::Psychologist, Recipient::SpecificUser { id, role: Role::Patient }) => Ok(Self {
                psychologist_id: Some(sender.user_id.clone()),
                patient_id: Some(id.clone()),
            }),
            (Role::Patient, Recipient::AdministrationDesk) => Ok(Self {
                psychologist_id: None,
                patient_id: Some(sender.user_id.clone()),
            }),
            (Role::Psychologist, Recipient::AdministrationDesk) => Ok(Self {
                psychologist_id: Some(sender.user_id.clone()),
                patient_id: None,
            }),
            (Role::Admin, Recipient::SpecificUser { id, role: Role::Patient }) => Ok(Self {
                psychologist_id: None,
                patient_id: Some(id.clone()),
            }),
            (Role::Admin, Recipient::SpecificUser { id, role: Role::Psychologist }) => Ok(Self {
                psychologist_id: Some(id.clone()),
                patient_id: None,
            }),
            (Role::Admin, _) => fail("administrators can only message patients or psychologists"),
            (Role::Patient, _) => fail("patients can only message psychologists or the administration"),
            (Role::Psychologist, _) => {
                fail("psychologists can only message patients or the administration")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationFilter {
    Active,
    Archived,
    Unread,
}

/// Listing entry: the conversation plus what a sidebar needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub last_message: Option<String>,
    pub last_message_at: Option<String>,
    pub unread_count: u64,
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        psychologist_id: row.get(1)?,
        patient_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Load a conversation by id, tombstones included.
pub fn get_conversation(conn: &Connection, id: &str) -> ChatResult<Option<Conversation>> {
    let sql = format!("SELECT {} FROM conversations c WHERE c.id = ?1", CONVERSATION_COLUMNS);
    Ok(conn
        .query_row(&sql, params![id], conversation_from_row)
        .optional()?)
}

/// Atomic find-or-create for a participant pair.
///
/// `INSERT OR IGNORE` against the partial unique index on the pair means concurrent first
/// contact from both sides inserts at most one row; the follow-up select returns whichever
/// row won. There is no read-then-insert window.
pub fn find_or_create(conn: &Connection, pair: &ParticipantPair) -> ChatResult<Conversation> {
    if pair.psychologist_id.is_none() && pair.patient_id.is_none() {
        return Err(ChatError::ConversationResolutionFailed(
            "conversation needs at least one non-administration participant".to_string(),
        ));
    }

    let now = now_timestamp();
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversations (id, psychologist_id, patient_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
        params![Uuid::now_v7().to_string(), pair.psychologist_id, pair.patient_id, now],
    )?;

    let sql = format!(
        "SELECT {} FROM conversations c
         WHERE COALESCE(c.psychologist_id, '') = COALESCE(?1, '')
           AND COALESCE(c.patient_id, '') = COALESCE(?2, '')
           AND c.status != 'deleted'",
        CONVERSATION_COLUMNS
    );
    let conversation = conn.query_row(
        &sql,
        params![pair.psychologist_id, pair.patient_id],
        conversation_from_row,
    )?;

    if inserted > 0 {
        tracing::debug!(conversation_id = %conversation.id, "Conversation created");
    }
    Ok(conversation)
}

/// Record activity: bump `updated_at` and reopen an archived conversation.
pub fn touch(conn: &Connection, id: &str, at: &str) -> ChatResult<()> {
    conn.execute(
        "UPDATE conversations
         SET updated_at = ?2,
             status = CASE WHEN status = 'archived' THEN 'active' ELSE status END
         WHERE id = ?1 AND status != 'deleted'",
        params![id, at],
    )?;
    Ok(())
}

/// Move between `active` and `archived`. Re-applying the current state is a no-op.
pub fn set_archived(conn: &Connection, id: &str, archived: bool) -> ChatResult<Conversation> {
    let (from, to) = if archived {
        (ConversationStatus::Active, ConversationStatus::Archived)
    } else {
        (ConversationStatus::Archived, ConversationStatus::Active)
    };

    conn.execute(
        "UPDATE conversations SET status = ?3 WHERE id = ?1 AND status = ?2",
        params![id, from, to],
    )?;

    match get_conversation(conn, id)? {
        Some(c) if c.status != ConversationStatus::Deleted => Ok(c),
        _ => Err(ChatError::NotFound("conversation")),
    }
}

/// Terminal deletion: drop every owned message and leave a tombstone row that no longer
/// holds the participant pair.
pub fn delete_conversation(conn: &mut Connection, id: &str) -> ChatResult<usize> {
    let tx = conn.transaction()?;

    let status: Option<ConversationStatus> = tx
        .query_row(
            "SELECT status FROM conversations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    match status {
        None | Some(ConversationStatus::Deleted) => return Err(ChatError::NotFound("conversation")),
        Some(_) => {}
    }

    let removed = tx.execute("DELETE FROM messages WHERE conversation_id = ?1", params![id])?;
    tx.execute(
        "UPDATE conversations SET status = 'deleted', updated_at = ?2 WHERE id = ?1",
        params![id, now_timestamp()],
    )?;
    tx.commit()?;

    Ok(removed)
}

/// Conversations visible to `reader`, most recent activity first.
pub fn list_for(
    conn: &Connection,
    reader: &Identity,
    filter: Option<ConversationFilter>,
) -> ChatResult<Vec<ConversationSummary>> {
    let sql = format!(
        "SELECT {columns},
            (SELECT m.content FROM messages m WHERE m.conversation_id = c.id
             ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
            (SELECT m.created_at FROM messages m WHERE m.conversation_id = c.id
             ORDER BY m.created_at DESC, m.id DESC LIMIT 1),
            (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id
             AND m.is_read = 0 AND {addressed})
         FROM conversations c
         WHERE c.status != 'deleted'
           AND ((:role = 'admin' AND (c.psychologist_id IS NULL OR c.patient_id IS NULL))
             OR (:role = 'psychologist' AND c.psychologist_id = :user)
             OR (:role = 'patient' AND c.patient_id = :user))
         ORDER BY c.updated_at DESC, c.id DESC",
        columns = CONVERSATION_COLUMNS,
        addressed = ADDRESSED_TO_READER,
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        named_params! { ":user": reader.user_id, ":role": reader.role },
        |row| {
            Ok(ConversationSummary {
                conversation: conversation_from_row(row)?,
                last_message: row.get(6)?,
                last_message_at: row.get(7)?,
                unread_count: row.get::<_, i64>(8)? as u64,
            })
        },
    )?;

    let mut summaries = Vec::new();
    for row in rows {
        let summary = row?;
        let keep = match filter {
            None => true,
            Some(ConversationFilter::Active) => {
                summary.conversation.status == ConversationStatus::Active
            }
            Some(ConversationFilter::Archived) => {
                summary.conversation.status == ConversationStatus::Archived
            }
            Some(ConversationFilter::Unread) => summary.unread_count > 0,
        };
        if keep {
            summaries.push(summary);
        }
    }
    Ok(summaries)
}
