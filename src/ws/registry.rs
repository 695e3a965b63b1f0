//! Connection Registry: who is connected right now, grouped into rooms.
//!
//! The registry is purely a fanout index. Losing it (restart) loses no messages, only
//! real-time delivery until clients reconnect and fetch history.

use axum::extract::ws::Message;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use super::{ConnectionSender, ServerEvent};
use crate::auth::Identity;
use crate::db::models::{Recipient, Role};

/// Identifier of one transport connection (one tab, one device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A live connection: its id plus the sender half of its writer channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: ConnectionSender,
}

/// Live-fanout group. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every connection of one user.
    Personal(String),
    /// Every admin operator connection, regardless of which admin.
    Administration,
}

impl Room {
    /// The room a party's own notifications go to: admins share one inbox.
    pub fn of_party(user_id: &str, role: Role) -> Self {
        match role {
            Role::Admin => Room::Administration,
            _ => Room::Personal(user_id.to_string()),
        }
    }
}

/// Injectable registry. The in-process implementation is [`InMemoryRegistry`]; a
/// pub/sub-backed one can replace it without touching the router.
pub trait ConnectionRegistry: Send + Sync {
    /// Add the handle to the user's personal room, and to the administration room for
    /// admins. Registering the same handle twice is a no-op.
    fn register(&self, identity: &Identity, handle: ConnectionHandle);

    /// Drop the handle from every room. Unknown handles are ignored.
    fn unregister(&self, connection_id: ConnectionId);

    /// Snapshot of a room's members. Publishing iterates the snapshot, never the live map.
    fn members(&self, room: &Room) -> Vec<ConnectionHandle>;

    /// Delivery room for a recipient.
    fn resolve_rooms_for(&self, recipient: &Recipient) -> Room {
        match recipient {
            Recipient::AdministrationDesk => Room::Administration,
            Recipient::SpecificUser { role: Role::Admin, .. } => Room::Administration,
            Recipient::SpecificUser { id, .. } => Room::Personal(id.clone()),
        }
    }

    /// Send `event` to the union of `rooms`, each connection at most once, skipping
    /// `exclude`. Returns how many connections it reached; zero means the target is
    /// offline, which is not an error.
    fn publish(&self, rooms: &[Room], event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let frame = match event.to_frame() {
            Some(frame) => frame,
            None => return 0,
        };

        let mut seen = HashSet::new();
        let mut reached = 0;
        for room in rooms {
            for handle in self.members(room) {
                if Some(handle.id) == exclude || !seen.insert(handle.id) {
                    continue;
                }
                if handle.sender.send(frame.clone()).is_ok() {
                    reached += 1;
                }
            }
        }
        reached
    }
}

pub type SharedRegistry = Arc<dyn ConnectionRegistry>;

/// Single-process registry backed by concurrent maps.
#[derive(Default)]
pub struct InMemoryRegistry {
    rooms: DashMap<Room, Vec<ConnectionHandle>>,
    /// Reverse index: which rooms each connection joined.
    joined: DashMap<ConnectionId, Vec<Room>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live connection count for a room.
    pub fn room_size(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|v| v.len()).unwrap_or(0)
    }
}

impl ConnectionRegistry for InMemoryRegistry {
    fn register(&self, identity: &Identity, handle: ConnectionHandle) {
        let mut rooms = vec![Room::Personal(identity.user_id.clone())];
        if identity.is_admin() {
            rooms.push(Room::Administration);
        }

        // The reverse-index entry doubles as the idempotency guard.
        match self.joined.entry(handle.id) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(rooms.clone());
            }
        }

        for room in rooms {
            self.rooms.entry(room).or_default().push(handle.clone());
        }

        tracing::debug!(
            user_id = %identity.user_id,
            connection_id = %handle.id,
            connections = self.room_size(&Room::Personal(identity.user_id.clone())),
            "Connection registered"
        );
    }

    fn unregister(&self, connection_id: ConnectionId) {
        let Some((_, rooms)) = self.joined.remove(&connection_id) else {
            return;
        };

        for room in rooms {
            let mut now_empty = false;
            if let Some(mut handles) = self.rooms.get_mut(&room) {
                handles.retain(|h| h.id != connection_id);
                now_empty = handles.is_empty();
            }
            if now_empty {
                self.rooms.remove_if(&room, |_, handles| handles.is_empty());
            }
        }

        tracing::debug!(connection_id = %connection_id, "Connection unregistered");
    }

    fn members(&self, room: &Room) -> Vec<ConnectionHandle> {
        self.rooms
            .get(room)
            .map(|handles| handles.value().clone())
            .unwrap_or_default()
    }
}

/// Create a new empty connection registry.
pub fn new_connection_registry() -> SharedRegistry {
    Arc::new(InMemoryRegistry::new())
}

/// Helper for callers that only hold a raw channel (tests, tools).
pub fn handle_for(sender: ConnectionSender) -> ConnectionHandle {
    ConnectionHandle {
        id: ConnectionId::new(),
        sender,
    }
}

/// Decode a text frame produced by [`ServerEvent::to_frame`].
pub fn decode_frame(message: &Message) -> Option<ServerEvent> {
    match message {
        Message::Text(text) => serde_json::from_str(text.as_str()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::StatusUpdate;
    use crate::db::models::MessageStatus;
    use tokio::sync::mpsc;

    fn identity(id: &str, role: Role) -> Identity {
        Identity {
            user_id: id.to_string(),
            role,
        }
    }

    fn connect(
        registry: &InMemoryRegistry,
        who: &Identity,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = handle_for(tx);
        let id = handle.id;
        registry.register(who, handle);
        (id, rx)
    }

    fn status_event() -> ServerEvent {
        ServerEvent::MessageStatusUpdated(StatusUpdate {
            message_id: "m1".into(),
            status: MessageStatus::Delivered,
        })
    }

    #[test]
    fn test_admins_join_the_shared_room() {
        let registry = InMemoryRegistry::new();
        let (_a, _rx_a) = connect(&registry, &identity("adm-1", Role::Admin));
        let (_b, _rx_b) = connect(&registry, &identity("adm-2", Role::Admin));
        let (_p, _rx_p) = connect(&registry, &identity("pat-1", Role::Patient));

        assert_eq!(registry.room_size(&Room::Administration), 2);
        assert_eq!(registry.room_size(&Room::Personal("adm-1".into())), 1);
        assert_eq!(registry.room_size(&Room::Personal("pat-1".into())), 1);
    }

    #[test]
    fn test_register_is_idempotent_and_unregister_tolerates_unknown() {
        let registry = InMemoryRegistry::new();
        let who = identity("psy-1", Role::Psychologist);
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = handle_for(tx);

        registry.register(&who, handle.clone());
        registry.register(&who, handle.clone());
        assert_eq!(registry.room_size(&Room::Personal("psy-1".into())), 1);

        registry.unregister(handle.id);
        registry.unregister(handle.id);
        registry.unregister(ConnectionId::new());
        assert_eq!(registry.room_size(&Room::Personal("psy-1".into())), 0);
    }

    #[test]
    fn test_resolve_rooms() {
        let registry = InMemoryRegistry::new();
        assert_eq!(
            registry.resolve_rooms_for(&Recipient::AdministrationDesk),
            Room::Administration
        );
        assert_eq!(
            registry.resolve_rooms_for(&Recipient::SpecificUser {
                id: "pat-1".into(),
                role: Role::Patient
            }),
            Room::Personal("pat-1".into())
        );
    }

    #[test]
    fn test_publish_dedups_and_excludes() {
        let registry = InMemoryRegistry::new();
        let admin = identity("adm-1", Role::Admin);
        let (origin, mut rx_origin) = connect(&registry, &admin);
        let (_other, mut rx_other) = connect(&registry, &admin);

        // Both rooms contain both connections; each must get the event once.
        let reached = registry.publish(
            &[Room::Administration, Room::Personal("adm-1".into())],
            &status_event(),
            Some(origin),
        );
        assert_eq!(reached, 1);
        assert!(rx_origin.try_recv().is_err());
        assert!(decode_frame(&rx_other.try_recv().unwrap()).is_some());
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn test_publish_to_offline_room_reaches_nobody() {
        let registry = InMemoryRegistry::new();
        let reached = registry.publish(&[Room::Personal("nobody".into())], &status_event(), None);
        assert_eq!(reached, 0);
    }
}
