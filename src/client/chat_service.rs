use std::path::Path;
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::api::{ApiClient, ApiError};
use crate::client::connection::{ConnectionError, ConnectionManager};
use crate::client::session_store::SessionStore;
use crate::client::store::ChatStore;
use crate::client::typing::TypingTracker;
use crate::common::events::{ClientEvent, ServerEvent};
use crate::common::models::{ChatListItem, ChatUser};
use crate::server::config::ClientConfig;

#[derive(Debug)]
pub enum ServiceError {
    /// Rejected client-side before any request was dispatched.
    Validation(String),
    Api(ApiError),
    Connection(ConnectionError),
    NoActiveChat,
    /// The collaborator answered 401/403; the session has been cleared
    /// and the user must log in again.
    LoggedOut,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(msg) => write!(f, "{}", msg),
            ServiceError::Api(e) => write!(f, "{}", e),
            ServiceError::Connection(e) => write!(f, "{}", e),
            ServiceError::NoActiveChat => write!(f, "No chat is selected"),
            ServiceError::LoggedOut => write!(f, "Session expired, login required"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// Ties the live pieces together for a UI: the HTTP collaborator client,
/// the socket connection, the reconciliation store, the typing debounce
/// and the durable session state. A frontend drives this and renders the
/// store; every socket event goes through `handle_event`.
pub struct ChatService {
    api: ApiClient,
    connection: ConnectionManager,
    session: SessionStore,
    store: ChatStore,
    typing: TypingTracker,
    current_user: Option<ChatUser>,
}

impl ChatService {
    pub fn new(config: &ClientConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            api: ApiClient::new(&config.api_url),
            connection: ConnectionManager::new(&config.socket_url)
                .map_err(ServiceError::Connection)?,
            session: SessionStore::new(config.data_dir.as_str()),
            store: ChatStore::new(),
            typing: TypingTracker::new(),
            current_user: None,
        })
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ChatStore {
        &mut self.store
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn current_user(&self) -> Option<&ChatUser> {
        self.current_user.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Incoming socket events for the UI loop; can be taken only once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.connection.take_events()
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ServiceError> {
        let result = self.api.login(username, password).await;
        let data = self.check(result)?;

        if let Err(e) = self.session.save_token(&data.access_token) {
            // Not fatal: the session just won't survive a reload.
            log::warn!("[CHAT_SERVICE] could not persist session token: {}", e);
        }
        self.api.set_token(data.access_token.clone());
        self.connection.set_token(data.access_token);
        self.current_user = Some(data.user);

        self.connection.connect().await.map_err(ServiceError::Connection)?;
        self.refresh_chats().await?;
        Ok(())
    }

    pub async fn register(
        &mut self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<ChatUser, ServiceError> {
        let result = self.api.register(email, username, password).await;
        self.check(result)
    }

    /// Pick up where a previous run left off: token from the keyring, the
    /// active chat from its shadow. Returns false when there is nothing
    /// to restore.
    pub async fn restore_session(&mut self) -> Result<bool, ServiceError> {
        let Some(token) = self.session.load_token() else {
            return Ok(false);
        };
        self.api.set_token(token.clone());
        self.connection.set_token(token);
        self.connection.connect().await.map_err(ServiceError::Connection)?;
        self.refresh_chats().await?;

        if let Some(shadow) = self.session.load_current_chat() {
            self.open_chat(shadow).await?;
        }
        Ok(true)
    }

    pub async fn logout(&mut self) {
        if let Err(e) = self.api.logout().await {
            log::warn!("[CHAT_SERVICE] logout request failed: {}", e);
        }
        self.session.clear_all();
        self.api.clear_token();
        self.connection.disconnect();
        self.store = ChatStore::new();
        self.typing = TypingTracker::new();
        self.current_user = None;
    }

    pub async fn refresh_chats(&mut self) -> Result<(), ServiceError> {
        let result = self.api.user_chats().await;
        let chats = self.check(result)?;
        self.store.set_chats(chats);
        Ok(())
    }

    /// Open a conversation: persist it as the current one, swap the room
    /// memberships (leave the previous chat, join the new one), clear its
    /// unread entries and fetch its history.
    pub async fn open_chat(&mut self, chat: ChatListItem) -> Result<(), ServiceError> {
        if self.store.active_chat().map(|c| c.id == chat.id).unwrap_or(false) {
            return Ok(());
        }

        let chat_id = chat.id.clone();
        if let Err(e) = self.session.save_current_chat(&chat) {
            log::warn!("[CHAT_SERVICE] could not persist current chat: {}", e);
        }

        if let Some(previous) = self.store.open_chat(chat) {
            // Best effort: room membership on a dead connection is moot.
            let _ = self.connection.send(ClientEvent::LeaveChat(previous));
        }
        self.connection
            .send(ClientEvent::JoinChat(chat_id.clone()))
            .map_err(ServiceError::Connection)?;

        let result = self.api.chat_messages(&chat_id).await;
        let history = self.check(result)?;
        self.store.set_history(history);
        Ok(())
    }

    /// Send a message in the active chat: stop the typing indicator
    /// immediately, persist over HTTP, then apply the response
    /// optimistically. The socket echo is dropped by correlation id.
    pub async fn send_message(
        &mut self,
        content: &str,
        attachments: &[&Path],
    ) -> Result<(), ServiceError> {
        let chat_id = self
            .store
            .active_chat()
            .map(|c| c.id.clone())
            .ok_or(ServiceError::NoActiveChat)?;
        if content.trim().is_empty() && attachments.is_empty() {
            return Err(ServiceError::Validation("Message is empty".to_string()));
        }

        let stop = self.typing.message_sent(&chat_id);
        let _ = self.connection.send(stop);

        // Register the correlation id before dispatching: the socket echo
        // may beat the HTTP response and must be recognized either way.
        let client_id = Uuid::new_v4().to_string();
        self.store.register_pending_send(&client_id);
        let result = self.api.send_message(&chat_id, content, &client_id, attachments).await;
        let message = match self.check(result) {
            Ok(message) => message,
            Err(e) => {
                self.store.forget_pending_send(&client_id);
                return Err(e);
            }
        };
        self.store.apply_local_send(message);
        Ok(())
    }

    /// Called on every keystroke in the message input.
    pub fn on_keystroke(&mut self, now: Instant) {
        let Some(chat_id) = self.store.active_chat().map(|c| c.id.clone()) else {
            return;
        };
        if let Some(event) = self.typing.keystroke(&chat_id, now) {
            // Dropped locally while disconnected.
            let _ = self.connection.send(event);
        }
    }

    /// Called periodically (or from a timer) to let the idle deadline
    /// fire.
    pub fn poll_typing(&mut self, now: Instant) {
        if let Some(event) = self.typing.poll(now) {
            let _ = self.connection.send(event);
        }
    }

    pub async fn create_group(
        &mut self,
        name: &str,
        participants: &[String],
    ) -> Result<ChatListItem, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("Group name is required".to_string()));
        }
        if participants.len() < 2 {
            return Err(ServiceError::Validation(
                "A group needs at least two other participants".to_string(),
            ));
        }
        let result = self.api.create_group(name, participants).await;
        let chat = self.check(result)?;
        self.store.on_new_chat(chat.clone());
        Ok(chat)
    }

    pub async fn create_chat(&mut self, receiver_id: &str) -> Result<ChatListItem, ServiceError> {
        let result = self.api.create_chat(receiver_id).await;
        let chat = self.check(result)?;
        self.store.on_new_chat(chat.clone());
        Ok(chat)
    }

    /// Delete (or, for groups, dissolve) a conversation.
    pub async fn delete_chat(&mut self, chat_id: &str) -> Result<(), ServiceError> {
        let Some(chat) = self.store.chats().iter().find(|c| c.id == chat_id).cloned() else {
            return Err(ServiceError::Validation(format!("Unknown chat {}", chat_id)));
        };
        let result = if chat.is_group_chat {
            self.api.delete_group(chat_id).await
        } else {
            self.api.delete_chat(chat_id).await
        };
        self.check(result)?;
        if self.store.on_chat_leave(&chat) {
            self.session.clear_current_chat();
        }
        Ok(())
    }

    pub async fn rename_group(
        &mut self,
        chat_id: &str,
        name: &str,
    ) -> Result<ChatListItem, ServiceError> {
        if name.trim().is_empty() {
            return Err(ServiceError::Validation("Group name is required".to_string()));
        }
        let result = self.api.rename_group(chat_id, name.trim()).await;
        let chat = self.check(result)?;
        // Our own rename comes back on the socket too; applying it here
        // keeps the UI current even if the echo is slow.
        self.handle_event(ServerEvent::UpdateGroupName(chat.clone()));
        Ok(chat)
    }

    /// Merge one incoming socket event into the client state.
    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                log::info!("[CHAT_SERVICE] socket handshake confirmed");
            }
            ServerEvent::SocketError(reason) => {
                log::warn!("[CHAT_SERVICE] socket error: {}", reason);
            }
            ServerEvent::Typing(chat_id) => self.store.on_typing(&chat_id),
            ServerEvent::StopTyping(chat_id) => self.store.on_stop_typing(&chat_id),
            ServerEvent::MessageReceived(message) => self.store.on_message_received(message),
            ServerEvent::NewChat(chat) => self.store.on_new_chat(chat),
            ServerEvent::LeaveChat(chat) => {
                if self.store.on_chat_leave(&chat) {
                    self.session.clear_current_chat();
                }
            }
            ServerEvent::UpdateGroupName(chat) => {
                if self.store.on_group_renamed(chat.clone()) {
                    if let Err(e) = self.session.save_current_chat(&chat) {
                        log::warn!("[CHAT_SERVICE] could not refresh chat shadow: {}", e);
                    }
                }
            }
        }
    }

    // Every collaborator response goes through here so a 401/403 logs the
    // whole process out exactly once, wherever it surfaces.
    fn check<T>(&mut self, result: Result<T, ApiError>) -> Result<T, ServiceError> {
        match result {
            Ok(value) => Ok(value),
            Err(ApiError::ForcedLogout) => {
                log::warn!("[CHAT_SERVICE] collaborator rejected the session, forcing logout");
                self.session.clear_all();
                self.api.clear_token();
                self.connection.disconnect();
                self.store = ChatStore::new();
                self.current_user = None;
                Err(ServiceError::LoggedOut)
            }
            Err(e) => Err(ServiceError::Api(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::models::ChatUser;
    use chrono::Utc;

    fn test_config(tag: &str) -> ClientConfig {
        ClientConfig {
            api_url: "http://127.0.0.1:9/api/v1".to_string(),
            socket_url: "ws://127.0.0.1:9".to_string(),
            data_dir: std::env::temp_dir()
                .join("ruggine_live_tests")
                .join(format!("svc-{}-{}", tag, uuid::Uuid::new_v4()))
                .to_string_lossy()
                .into_owned(),
        }
    }

    fn chat(id: &str) -> ChatListItem {
        let now = Utc::now();
        ChatListItem {
            id: id.to_string(),
            name: id.to_string(),
            is_group_chat: true,
            participants: vec![ChatUser {
                id: "a".to_string(),
                username: "a".to_string(),
                email: "a@example.com".to_string(),
                avatar_url: None,
            }],
            admin: Some("a".to_string()),
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn group_validation_rejects_before_dispatch() {
        let mut service = ChatService::new(&test_config("validation")).unwrap();

        // No server is listening on the configured URLs: reaching the
        // network would fail loudly, so an inline Validation error proves
        // the request was never sent.
        let err = service.create_group("", &["u1".into(), "u2".into()]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = service.create_group("team", &["u1".into()]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn send_without_active_chat_is_refused() {
        let mut service = ChatService::new(&test_config("noactive")).unwrap();
        let err = service.send_message("hello", &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoActiveChat));
    }

    #[tokio::test]
    async fn leave_event_for_active_chat_clears_the_shadow() {
        let mut service = ChatService::new(&test_config("leave")).unwrap();
        let g1 = chat("g1");

        service.store_mut().set_chats(vec![g1.clone()]);
        service.store_mut().open_chat(g1.clone());
        service.session().save_current_chat(&g1).unwrap();

        service.handle_event(ServerEvent::LeaveChat(g1));

        assert!(service.store().active_chat().is_none());
        assert_eq!(service.session().load_current_chat(), None);
    }

    #[tokio::test]
    async fn rename_event_for_active_chat_refreshes_the_shadow() {
        let mut service = ChatService::new(&test_config("rename")).unwrap();
        let g1 = chat("g1");

        service.store_mut().set_chats(vec![g1.clone()]);
        service.store_mut().open_chat(g1.clone());
        service.session().save_current_chat(&g1).unwrap();

        let mut renamed = chat("g1");
        renamed.name = "Team X".to_string();
        service.handle_event(ServerEvent::UpdateGroupName(renamed));

        assert_eq!(service.store().active_chat().unwrap().name, "Team X");
        assert_eq!(service.session().load_current_chat().unwrap().name, "Team X");
    }
}
