use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::common::events::ServerEvent;

pub type ConnectionId = String;

#[derive(Default)]
struct RegistryInner {
    // connection_id -> outbound frame sender of that connection's pump task
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<Message>>,
    // room name -> member connection ids
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

/// Named broadcast groups over the live connections, socket.io-room style:
/// any connection joined to a room receives events emitted into it. Rooms
/// live only here; membership is rebuilt on every connect.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<RegistryInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn_id: &str, sender: mpsc::UnboundedSender<Message>) {
        let mut inner = self.inner.lock().await;
        inner.connections.insert(conn_id.to_string(), sender);
        log::debug!("[ROOMS] registered connection {} (total={})", conn_id, inner.connections.len());
    }

    /// Drop a connection and every room membership it holds.
    pub async fn unregister(&self, conn_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.connections.remove(conn_id);
        inner.rooms.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
        log::debug!("[ROOMS] unregistered connection {} (total={})", conn_id, inner.connections.len());
    }

    /// Join a room. Idempotent: joining a room already joined is a no-op.
    pub async fn join(&self, room: &str, conn_id: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.connections.contains_key(conn_id) {
            log::warn!("[ROOMS] join for unknown connection {}", conn_id);
            return;
        }
        inner.rooms.entry(room.to_string()).or_default().insert(conn_id.to_string());
    }

    pub async fn leave(&self, room: &str, conn_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(conn_id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    pub async fn is_member(&self, room: &str, conn_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.rooms.get(room).map_or(false, |m| m.contains(conn_id))
    }

    pub async fn member_count(&self, room: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.rooms.get(room).map_or(0, |m| m.len())
    }

    /// Emit an event to every member of a room.
    pub async fn emit(&self, room: &str, event: &ServerEvent) -> anyhow::Result<()> {
        self.emit_to_rooms(&[room], event, None).await
    }

    /// Emit an event to every member of a room except one connection.
    /// This is the relay primitive, so typing signals never echo back to
    /// their sender.
    pub async fn emit_except(
        &self,
        room: &str,
        except_conn: &str,
        event: &ServerEvent,
    ) -> anyhow::Result<()> {
        self.emit_to_rooms(&[room], event, Some(except_conn)).await
    }

    /// Emit an event into the union of several rooms, delivering at most
    /// once per connection per emission even when a connection is a member
    /// of more than one of the rooms.
    pub async fn emit_to_rooms(
        &self,
        rooms: &[&str],
        event: &ServerEvent,
        except_conn: Option<&str>,
    ) -> anyhow::Result<()> {
        let text = serde_json::to_string(event)?;
        let inner = self.inner.lock().await;

        let mut targets: HashSet<&ConnectionId> = HashSet::new();
        for room in rooms {
            if let Some(members) = inner.rooms.get(*room) {
                targets.extend(members);
            }
        }

        for conn_id in targets {
            if Some(conn_id.as_str()) == except_conn {
                continue;
            }
            if let Some(sender) = inner.connections.get(conn_id) {
                // A dead receiver is cleaned up by its own disconnect path.
                let _ = sender.send(Message::Text(text.clone()));
            }
        }
        Ok(())
    }

    /// Emit an event to a single connection, room membership aside.
    pub async fn send_to(&self, conn_id: &str, event: &ServerEvent) -> anyhow::Result<()> {
        let text = serde_json::to_string(event)?;
        let inner = self.inner.lock().await;
        if let Some(sender) = inner.connections.get(conn_id) {
            let _ = sender.send(Message::Text(text));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::events::ServerEvent;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn connect(registry: &RoomRegistry, conn_id: &str) -> UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn_id, tx).await;
        rx
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(Message::Text(text)) = rx.try_recv() {
            events.push(serde_json::from_str(&text).expect("valid event json"));
        }
        events
    }

    #[tokio::test]
    async fn double_join_delivers_once() {
        let registry = RoomRegistry::new();
        let mut rx = connect(&registry, "c1").await;

        registry.join("chat-1", "c1").await;
        registry.join("chat-1", "c1").await;
        assert_eq!(registry.member_count("chat-1").await, 1);

        registry.emit("chat-1", &ServerEvent::Typing("chat-1".into())).await.unwrap();
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn emit_except_skips_the_sender() {
        let registry = RoomRegistry::new();
        let mut sender_rx = connect(&registry, "sender").await;
        let mut peer_rx = connect(&registry, "peer").await;
        registry.join("chat-1", "sender").await;
        registry.join("chat-1", "peer").await;

        registry
            .emit_except("chat-1", "sender", &ServerEvent::Typing("chat-1".into()))
            .await
            .unwrap();

        assert!(drain(&mut sender_rx).is_empty());
        assert_eq!(drain(&mut peer_rx), vec![ServerEvent::Typing("chat-1".into())]);
    }

    #[tokio::test]
    async fn union_emission_is_at_most_once_per_connection() {
        let registry = RoomRegistry::new();
        // member of both the chat room and their personal room
        let mut rx = connect(&registry, "c1").await;
        registry.join("chat-1", "c1").await;
        registry.join("user-a", "c1").await;

        registry
            .emit_to_rooms(&["chat-1", "user-a"], &ServerEvent::StopTyping("chat-1".into()), None)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn leave_stops_delivery() {
        let registry = RoomRegistry::new();
        let mut rx = connect(&registry, "c1").await;
        registry.join("chat-1", "c1").await;
        registry.leave("chat-1", "c1").await;

        registry.emit("chat-1", &ServerEvent::Typing("chat-1".into())).await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert!(!registry.is_member("chat-1", "c1").await);
    }

    #[tokio::test]
    async fn unregister_removes_every_membership() {
        let registry = RoomRegistry::new();
        let _rx = connect(&registry, "c1").await;
        registry.join("chat-1", "c1").await;
        registry.join("chat-2", "c1").await;
        registry.join("user-a", "c1").await;

        registry.unregister("c1").await;

        assert_eq!(registry.member_count("chat-1").await, 0);
        assert_eq!(registry.member_count("chat-2").await, 0);
        assert_eq!(registry.member_count("user-a").await, 0);
    }

    #[tokio::test]
    async fn join_before_register_is_refused() {
        let registry = RoomRegistry::new();
        registry.join("chat-1", "ghost").await;
        assert_eq!(registry.member_count("chat-1").await, 0);
    }
}
