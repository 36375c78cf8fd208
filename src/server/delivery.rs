use std::sync::Arc;

use crate::common::events::ServerEvent;
use crate::common::models::{ChatListItem, ChatMessage};
use crate::server::rooms::RoomRegistry;

/// Post-persistence fan-out. The HTTP collaborator calls these from the
/// same request handling that persisted the change, so clients only ever
/// see events for state that is already durable.
pub struct DeliveryBus {
    registry: Arc<RoomRegistry>,
}

impl DeliveryBus {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Fan a freshly persisted message out to the chat room and to every
    /// participant's personal room, the sender's included, so their other
    /// devices stay current. The originating tab recognizes the echo by
    /// its correlation id and drops it.
    pub async fn message_received(
        &self,
        chat: &ChatListItem,
        message: &ChatMessage,
    ) -> anyhow::Result<()> {
        let mut rooms: Vec<&str> = vec![chat.id.as_str()];
        rooms.extend(chat.participant_ids());

        log::info!(
            "[DELIVERY] messageReceived {} -> chat {} ({} participants)",
            message.id,
            chat.id,
            chat.participants.len()
        );
        self.registry
            .emit_to_rooms(&rooms, &ServerEvent::MessageReceived(message.clone()), None)
            .await
    }

    /// Announce a newly created conversation to its participants, minus
    /// the initiator: their own client already has the chat from the
    /// HTTP response.
    pub async fn new_chat(&self, chat: &ChatListItem, initiator_id: &str) -> anyhow::Result<()> {
        let rooms: Vec<&str> =
            chat.participant_ids().filter(|id| *id != initiator_id).collect();
        log::info!("[DELIVERY] newChat {} -> {} participants", chat.id, rooms.len());
        self.registry
            .emit_to_rooms(&rooms, &ServerEvent::NewChat(chat.clone()), None)
            .await
    }

    /// Tell the listed users they are no longer part of a chat (group
    /// deletion, removal by the admin, or their own leave).
    pub async fn chat_left(&self, chat: &ChatListItem, user_ids: &[&str]) -> anyhow::Result<()> {
        log::info!("[DELIVERY] leaveChat {} -> {} users", chat.id, user_ids.len());
        self.registry
            .emit_to_rooms(user_ids, &ServerEvent::LeaveChat(chat.clone()), None)
            .await
    }

    /// Push updated group metadata to every participant.
    pub async fn group_renamed(&self, chat: &ChatListItem) -> anyhow::Result<()> {
        let rooms: Vec<&str> = chat.participant_ids().collect();
        log::info!("[DELIVERY] updateGroupName {} -> \"{}\"", chat.id, chat.name);
        self.registry
            .emit_to_rooms(&rooms, &ServerEvent::UpdateGroupName(chat.clone()), None)
            .await
    }
}
