//! Conversation Store: the durable side of the messaging subsystem.
//!
//! Every query lives in a synchronous function taking `&Connection` so several of them
//! can share one transaction. `ConversationStore` is the async facade: it takes the
//! connection lock inside `spawn_blocking`, the same way every handler in the server
//! talks to SQLite.

pub mod conversations;
pub mod members;
pub mod messages;

use rusqlite::Connection;

use crate::db::DbPool;
use crate::error::{ChatError, ChatResult};

pub use conversations::{ConversationFilter, ConversationSummary, ParticipantPair};
pub use members::GroupSelector;
pub use messages::{DeliveredOutcome, HistoryPage, NewMessage, StatusChange};

/// `WHERE` fragment selecting messages addressed to the reader bound as `:user` / `:role`.
/// Admin readers match on role alone: "addressed to admin" carries no operator id.
pub(crate) const ADDRESSED_TO_READER: &str = "((:role = 'admin' AND m.recipient_type = 'admin')
     OR (:role != 'admin' AND m.recipient_id = :user AND m.recipient_type = :role))";

#[derive(Clone)]
pub struct ConversationStore {
    db: DbPool,
}

impl ConversationStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Run `f` against the locked connection on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> ChatResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> ChatResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            // A panic in an earlier closure poisons the lock. SQLite rolls back any
            // open transaction on drop, so the connection itself is still usable.
            let mut conn = db.lock().unwrap_or_else(|poisoned| {
                tracing::warn!("DB lock was poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut conn)
        })
        .await
        .map_err(|e| ChatError::Internal(format!("Task join: {}", e)))?
    }
}
