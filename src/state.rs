use crate::config::RealtimeConfig;
use crate::db::DbPool;
use crate::store::ConversationStore;
use crate::ws::{new_connection_registry, SharedRegistry};

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Durable conversations, messages and member directory
    pub store: ConversationStore,
    /// Live connections grouped into rooms
    pub registry: SharedRegistry,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Keep-alive, paging and rate limit settings
    pub realtime: RealtimeConfig,
}

impl AppState {
    /// State over an initialized database with an empty in-memory registry.
    pub fn new(db: DbPool, jwt_secret: Vec<u8>, realtime: RealtimeConfig) -> Self {
        Self {
            store: ConversationStore::new(db),
            registry: new_connection_registry(),
            jwt_secret,
            realtime,
        }
    }

    /// Swap in a different registry implementation.
    pub fn with_registry(mut self, registry: SharedRegistry) -> Self {
        self.registry = registry;
        self
    }
}
