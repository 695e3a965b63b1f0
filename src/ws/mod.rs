pub mod actor;
pub mod events;
pub mod handler;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use events::{Ack, ClientEvent, ConversationUpdate, ErrorFrame, SendMessagePayload, ServerEvent, StatusUpdate};
pub use registry::{
    new_connection_registry, ConnectionHandle, ConnectionId, ConnectionRegistry, InMemoryRegistry, Room,
    SharedRegistry,
};

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
