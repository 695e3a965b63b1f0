//! Client reconciler: folds optimistic sends, acks, pushed messages and status updates
//! into one ordered message list without duplicates or status regressions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::db::models::{Message, MessageStatus};

/// How long a status update for a message we have not seen yet is kept.
pub const DEFAULT_ORPHAN_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    /// Client-generated key of an optimistic send awaiting its ack.
    Temporary(String),
    /// Server-assigned message id.
    Server(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub key: MessageKey,
    pub conversation_id: Option<String>,
    pub sender_id: String,
    pub content: String,
    pub status: MessageStatus,
    /// The send was rejected; the entry stays visible so the user can retry.
    pub failed: bool,
}

impl LocalMessage {
    fn from_server(message: &Message) -> Self {
        Self {
            key: MessageKey::Server(message.id.clone()),
            conversation_id: Some(message.conversation_id.clone()),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
            status: message.status,
            failed: false,
        }
    }

    /// Forward progress only.
    fn upgrade(&mut self, status: MessageStatus) {
        if self.status.advances_to(status) {
            self.status = status;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Orphan {
    status: MessageStatus,
    seen_at: Instant,
}

#[derive(Debug)]
pub struct Reconciler {
    entries: Vec<LocalMessage>,
    orphans: HashMap<String, Orphan>,
    orphan_ttl: Duration,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DEFAULT_ORPHAN_TTL)
    }
}

impl Reconciler {
    pub fn new(orphan_ttl: Duration) -> Self {
        Self {
            entries: Vec::new(),
            orphans: HashMap::new(),
            orphan_ttl,
        }
    }

    pub fn entries(&self) -> &[LocalMessage] {
        &self.entries
    }

    pub fn get(&self, key: &MessageKey) -> Option<&LocalMessage> {
        self.entries.iter().find(|e| &e.key == key)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    fn position(&self, key: &MessageKey) -> Option<usize> {
        self.entries.iter().position(|e| &e.key == key)
    }

    /// Render an optimistic message. Returns its temporary key.
    pub fn begin_send(&mut self, sender_id: &str, conversation_id: Option<String>, content: &str) -> String {
        let temp = format!("tmp-{}", Uuid::now_v7());
        self.entries.push(LocalMessage {
            key: MessageKey::Temporary(temp.clone()),
            conversation_id,
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            status: MessageStatus::Sent,
            failed: false,
        });
        temp
    }

    /// The ack arrived. The optimistic entry takes the server id in place; if the server
    /// copy got here first, the optimistic entry folds into it instead.
    /// Returns false when `temp_key` is unknown.
    pub fn confirm_send(&mut self, temp_key: &str, message: &Message) -> bool {
        let Some(pos) = self.position(&MessageKey::Temporary(temp_key.to_string())) else {
            return false;
        };

        let server_key = MessageKey::Server(message.id.clone());
        if let Some(existing) = self.position(&server_key) {
            let optimistic = self.entries.remove(pos);
            let existing = if existing > pos { existing - 1 } else { existing };
            let entry = &mut self.entries[existing];
            entry.upgrade(optimistic.status);
            entry.upgrade(message.status);
        } else {
            let status = self.entries[pos].status.max(message.status);
            let mut entry = LocalMessage::from_server(message);
            entry.status = status;
            self.entries[pos] = entry;
        }

        self.adopt_orphan(&message.id);
        true
    }

    /// The send was rejected. Returns false when `temp_key` is unknown.
    pub fn fail_send(&mut self, temp_key: &str) -> bool {
        match self.position(&MessageKey::Temporary(temp_key.to_string())) {
            Some(pos) => {
                self.entries[pos].failed = true;
                true
            }
            None => false,
        }
    }

    /// A pushed message (`receiveMessage`, echo, or a history load). Known ids only get
    /// their status upgraded; new ids are appended.
    pub fn receive(&mut self, message: &Message) {
        match self.position(&MessageKey::Server(message.id.clone())) {
            Some(pos) => self.entries[pos].upgrade(message.status),
            None => self.entries.push(LocalMessage::from_server(message)),
        }
        self.adopt_orphan(&message.id);
    }

    /// A `message_status_updated` event. Updates for ids not rendered yet are held until
    /// the message shows up or the orphan expires. The TTL runs from the first update;
    /// repeats only upgrade the held status.
    pub fn apply_status(&mut self, message_id: &str, status: MessageStatus, now: Instant) {
        if let Some(pos) = self.position(&MessageKey::Server(message_id.to_string())) {
            self.entries[pos].upgrade(status);
            return;
        }

        self.orphans
            .entry(message_id.to_string())
            .and_modify(|o| {
                if o.status.advances_to(status) {
                    o.status = status;
                }
            })
            .or_insert(Orphan { status, seen_at: now });
    }

    /// Drop orphans older than the TTL. Returns how many were discarded.
    pub fn prune_orphans(&mut self, now: Instant) -> usize {
        let ttl = self.orphan_ttl;
        let before = self.orphans.len();
        self.orphans
            .retain(|_, o| now.saturating_duration_since(o.seen_at) < ttl);
        before - self.orphans.len()
    }

    fn adopt_orphan(&mut self, message_id: &str) {
        if let Some(orphan) = self.orphans.remove(message_id) {
            if let Some(pos) = self.position(&MessageKey::Server(message_id.to_string())) {
                self.entries[pos].upgrade(orphan.status);
            }
        }
    }
}
