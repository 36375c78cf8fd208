use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat participant as the HTTP collaborator returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A file attached to a message. Upload and storage belong to the HTTP
/// collaborator; the core only carries the references around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub local_path: String,
}

/// A persisted chat message. Immutable once created; ordering is creation
/// order, rendered newest-first in the active thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    /// Id of the chat this message belongs to.
    pub chat: String,
    pub sender: ChatUser,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Correlation id minted by the sending client and echoed by the
    /// server, so the originating tab can drop its own socket echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of the client's chat list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    pub id: String,
    pub name: String,
    pub is_group_chat: bool,
    pub participants: Vec<ChatUser>,
    /// Admin user id; present for group chats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatListItem {
    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        self.participants.iter().map(|p| p.id.as_str())
    }
}

/// Uniform response envelope of the HTTP collaborator. `success != true`
/// is an error path regardless of the transport status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}
