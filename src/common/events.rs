use serde::{Deserialize, Serialize};

use crate::common::models::{ChatListItem, ChatMessage};

/// Events the client sends over the socket. Envelope is `{event, payload}`
/// with camelCase event names, matching the HTTP collaborator's contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join the room for a chat the user has opened.
    JoinChat(String),
    /// Leave the room for a chat the user has navigated away from.
    LeaveChat(String),
    /// The user started typing in a chat.
    Typing(String),
    /// The user stopped typing in a chat.
    StopTyping(String),
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Handshake succeeded; the connection is authenticated.
    Connected,
    /// Handshake or internal failure, with a human-readable reason.
    SocketError(String),
    /// Relayed typing signal for a chat.
    Typing(String),
    /// Relayed stop-typing signal for a chat.
    StopTyping(String),
    /// A message was persisted and is being fanned out.
    MessageReceived(ChatMessage),
    /// A new conversation involving this user was created.
    NewChat(ChatListItem),
    /// The user was removed from (or left) a group chat.
    LeaveChat(ChatListItem),
    /// Group metadata changed.
    UpdateGroupName(ChatListItem),
}

impl ClientEvent {
    /// Typing state changes are fire-and-forget and may be dropped while
    /// the connection is down; everything else is not.
    pub fn is_typing_signal(&self) -> bool {
        matches!(self, ClientEvent::Typing(_) | ClientEvent::StopTyping(_))
    }
}
