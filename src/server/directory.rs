use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::models::{ChatListItem, ChatUser};

/// User-lookup collaborator consumed at handshake time to resolve a token
/// subject into an identity.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> anyhow::Result<Option<ChatUser>>;
}

/// Participancy source consumed by the join-room check. The chat records
/// themselves live with the persistence collaborator.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> anyhow::Result<bool>;
}

#[derive(Default)]
struct DirectoryInner {
    users: HashMap<String, ChatUser>,
    // chat_id -> participant user ids
    chat_members: HashMap<String, Vec<String>>,
}

/// In-process directory backing the server binary and the test suite.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    inner: Arc<Mutex<DirectoryInner>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, user: ChatUser) {
        let mut inner = self.inner.lock().await;
        inner.users.insert(user.id.clone(), user);
    }

    pub async fn add_chat(&self, chat: &ChatListItem) {
        let mut inner = self.inner.lock().await;
        inner.chat_members.insert(
            chat.id.clone(),
            chat.participant_ids().map(str::to_string).collect(),
        );
    }

    pub async fn add_chat_members(&self, chat_id: &str, member_ids: &[&str]) {
        let mut inner = self.inner.lock().await;
        inner
            .chat_members
            .insert(chat_id.to_string(), member_ids.iter().map(|s| s.to_string()).collect());
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_user(&self, user_id: &str) -> anyhow::Result<Option<ChatUser>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(user_id).cloned())
    }
}

#[async_trait]
impl ChatDirectory for InMemoryDirectory {
    async fn is_participant(&self, chat_id: &str, user_id: &str) -> anyhow::Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner
            .chat_members
            .get(chat_id)
            .map(|members| members.iter().any(|m| m == user_id))
            .unwrap_or(false))
    }
}
