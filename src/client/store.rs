use std::collections::HashSet;

use crate::common::models::{ChatListItem, ChatMessage};

/// The in-memory client model that live events are merged into: the chat
/// list (most-recent-activity first), the active conversation's message
/// feed (newest first), the unread set for everything else, and the
/// peer-typing flag for the active chat.
///
/// All state is owned here and threaded explicitly through the event
/// handlers; there is no shared mutable current-chat cell for callbacks
/// to close over.
#[derive(Debug, Default)]
pub struct ChatStore {
    chats: Vec<ChatListItem>,
    active: Option<ChatListItem>,
    messages: Vec<ChatMessage>,
    unread: Vec<ChatMessage>,
    peer_typing: bool,
    // Correlation ids of our own sends, registered before the HTTP call
    // is dispatched; the matching socket echo is dropped whether it lands
    // before or after the response resolves.
    local_sends: HashSet<String>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chats(&self) -> &[ChatListItem] {
        &self.chats
    }

    pub fn active_chat(&self) -> Option<&ChatListItem> {
        self.active.as_ref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn unread_count(&self, chat_id: &str) -> usize {
        self.unread.iter().filter(|m| m.chat == chat_id).count()
    }

    pub fn is_peer_typing(&self) -> bool {
        self.peer_typing
    }

    /// Replace the chat list wholesale (initial load / refresh).
    pub fn set_chats(&mut self, chats: Vec<ChatListItem>) {
        self.chats = chats;
    }

    /// Replace the active feed with freshly fetched history.
    pub fn set_history(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    /// Make a chat the active one. Clears exactly the unread entries that
    /// belong to it (wholesale, not one by one) and returns the id of
    /// the chat that was active before, so the caller can leave its room.
    pub fn open_chat(&mut self, chat: ChatListItem) -> Option<String> {
        let previous = self.active.take().map(|c| c.id);
        let chat_id = chat.id.clone();
        self.unread.retain(|m| m.chat != chat_id);
        self.peer_typing = false;
        self.active = Some(chat);
        previous
    }

    /// Drop the active-chat reference (chat deleted, user removed, …).
    pub fn close_active(&mut self) {
        self.active = None;
        self.messages.clear();
        self.peer_typing = false;
    }

    /// Record a correlation id before its send is dispatched, so the
    /// server echo is recognized no matter how the echo and the HTTP
    /// response race each other.
    pub fn register_pending_send(&mut self, client_id: &str) {
        self.local_sends.insert(client_id.to_string());
    }

    /// The send failed; the echo will never come.
    pub fn forget_pending_send(&mut self, client_id: &str) {
        self.local_sends.remove(client_id);
    }

    /// Apply our own just-sent message from the HTTP response.
    pub fn apply_local_send(&mut self, message: ChatMessage) {
        let chat_id = message.chat.clone();
        self.messages.insert(0, message.clone());
        self.touch_chat(&chat_id, message);
    }

    /// Merge an incoming `messageReceived` event.
    pub fn on_message_received(&mut self, message: ChatMessage) {
        // Our own echo; the optimistic apply from the HTTP response is the
        // copy that counts.
        if let Some(client_id) = &message.client_id {
            if self.local_sends.remove(client_id) {
                return;
            }
        }
        // Events for chats we no longer (or never) know about are dropped
        // whole; the socket layer cannot know whether a chatId is stale.
        if !self.chats.iter().any(|c| c.id == message.chat) {
            log::debug!("[STORE] messageReceived for unknown chat {} ignored", message.chat);
            return;
        }

        let is_active = self
            .active
            .as_ref()
            .map(|a| a.id == message.chat)
            .unwrap_or(false);
        if is_active {
            self.messages.insert(0, message.clone());
        } else {
            self.unread.insert(0, message.clone());
        }

        let chat_id = message.chat.clone();
        self.touch_chat(&chat_id, message);
    }

    /// Typing relay events apply only to the chat currently open.
    pub fn on_typing(&mut self, chat_id: &str) {
        if self.active.as_ref().map(|a| a.id == chat_id).unwrap_or(false) {
            self.peer_typing = true;
        }
    }

    pub fn on_stop_typing(&mut self, chat_id: &str) {
        if self.active.as_ref().map(|a| a.id == chat_id).unwrap_or(false) {
            self.peer_typing = false;
        }
    }

    /// A new conversation involving this user was created elsewhere.
    pub fn on_new_chat(&mut self, chat: ChatListItem) {
        if self.chats.iter().any(|c| c.id == chat.id) {
            return;
        }
        self.chats.insert(0, chat);
    }

    /// The user left or was removed from a chat. Returns true when the
    /// active chat was the one affected, so the caller can clear the
    /// durable shadow as well.
    pub fn on_chat_leave(&mut self, chat: &ChatListItem) -> bool {
        self.chats.retain(|c| c.id != chat.id);
        self.unread.retain(|m| m.chat != chat.id);
        let was_active = self
            .active
            .as_ref()
            .map(|a| a.id == chat.id)
            .unwrap_or(false);
        if was_active {
            self.close_active();
        }
        was_active
    }

    /// Group metadata changed. The list entry is patched in place; a
    /// rename is not activity, so the list order stays. Returns true when
    /// the active chat was replaced (shadow refresh needed).
    pub fn on_group_renamed(&mut self, chat: ChatListItem) -> bool {
        if let Some(entry) = self.chats.iter_mut().find(|c| c.id == chat.id) {
            *entry = chat.clone();
        }
        let is_active = self
            .active
            .as_ref()
            .map(|a| a.id == chat.id)
            .unwrap_or(false);
        if is_active {
            self.active = Some(chat);
        }
        is_active
    }

    // Move the chat to the front of the list with lastMessage/updatedAt
    // rewritten in the same step. Untouched chats keep their relative
    // order.
    fn touch_chat(&mut self, chat_id: &str, message: ChatMessage) {
        let Some(pos) = self.chats.iter().position(|c| c.id == chat_id) else {
            return;
        };
        let mut chat = self.chats.remove(pos);
        chat.updated_at = message.updated_at;
        chat.last_message = Some(message);
        self.chats.insert(0, chat);
    }
}
