use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: Conversations and messages

CREATE TABLE members (
    id TEXT PRIMARY KEY,
    role TEXT NOT NULL CHECK (role IN ('patient', 'psychologist', 'admin')),
    display_name TEXT NOT NULL,
    plan TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_members_role ON members(role);

CREATE TABLE conversations (
    id TEXT PRIMARY KEY,
    psychologist_id TEXT,
    patient_id TEXT,
    status TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'archived', 'deleted')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (psychologist_id IS NOT NULL OR patient_id IS NOT NULL)
);

-- One live conversation per participant pair. NULL (administration desk) is folded
-- to '' so it compares equal; deleted tombstones release the pair.
CREATE UNIQUE INDEX idx_conversations_pair
    ON conversations(COALESCE(psychologist_id, ''), COALESCE(patient_id, ''))
    WHERE status != 'deleted';

CREATE INDEX idx_conversations_psychologist ON conversations(psychologist_id);
CREATE INDEX idx_conversations_patient ON conversations(patient_id);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    sender_type TEXT NOT NULL CHECK (sender_type IN ('patient', 'psychologist', 'admin')),
    recipient_id TEXT,
    recipient_type TEXT NOT NULL CHECK (recipient_type IN ('patient', 'psychologist', 'admin')),
    content TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'sent' CHECK (status IN ('sent', 'delivered', 'read')),
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
    CHECK ((status = 'read') = (is_read = 1))
);

CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
CREATE INDEX idx_messages_recipient ON messages(recipient_id, is_read);
",
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations().validate().is_ok());
    }
}
