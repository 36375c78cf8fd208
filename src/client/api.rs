use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::models::{ApiEnvelope, ChatListItem, ChatMessage, ChatUser};

#[derive(Debug, Clone)]
pub enum ApiError {
    /// The request never produced a usable response.
    Transport(String),
    /// The collaborator answered with `success != true`.
    Api { status: u16, message: String },
    /// 401/403: the session is gone and the caller must log the user
    /// out process-wide.
    ForcedLogout,
    Decode(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Transport(msg) => write!(f, "Request failed: {}", msg),
            ApiError::Api { status, message } => write!(f, "Request rejected ({}): {}", status, message),
            ApiError::ForcedLogout => write!(f, "Session expired, login required"),
            ApiError::Decode(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: ChatUser,
    pub access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    content: &'a str,
    client_id: &'a str,
}

/// Typed wrapper over the HTTP collaborator. Every response is the
/// uniform `{success, statusCode, message, data}` envelope; the wrapper
/// turns the envelope's failure modes into `ApiError` so callers never
/// look at raw responses.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            token: None,
        }
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn parse<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status().as_u16();
        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        check_envelope(status, envelope)
    }

    /// Like `parse`, for endpoints whose success payload is irrelevant.
    async fn parse_empty(&self, resp: reqwest::Response) -> Result<(), ApiError> {
        let status = resp.status().as_u16();
        let envelope: ApiEnvelope<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        check_envelope_status(status, &envelope)?;
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginData, ApiError> {
        let resp = self
            .http
            .post(self.url("/users/login"))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<ChatUser, ApiError> {
        let resp = self
            .http
            .post(self.url("/users/register"))
            .json(&serde_json::json!({
                "email": email,
                "username": username,
                "password": password,
            }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let resp = self
            .authed(self.http.post(self.url("/users/logout")))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse_empty(resp).await
    }

    pub async fn available_users(&self) -> Result<Vec<ChatUser>, ApiError> {
        let resp = self
            .authed(self.http.get(self.url("/chat-app/chats/users")))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn user_chats(&self) -> Result<Vec<ChatListItem>, ApiError> {
        let resp = self
            .authed(self.http.get(self.url("/chat-app/chats")))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn create_chat(&self, receiver_id: &str) -> Result<ChatListItem, ApiError> {
        let resp = self
            .authed(self.http.post(self.url(&format!("/chat-app/chats/c/{}", receiver_id))))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn create_group(
        &self,
        name: &str,
        participants: &[String],
    ) -> Result<ChatListItem, ApiError> {
        let resp = self
            .authed(self.http.post(self.url("/chat-app/chats/group")))
            .json(&serde_json::json!({ "name": name, "participants": participants }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn rename_group(&self, chat_id: &str, name: &str) -> Result<ChatListItem, ApiError> {
        let resp = self
            .authed(self.http.patch(self.url(&format!("/chat-app/chats/group/{}", chat_id))))
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn delete_group(&self, chat_id: &str) -> Result<(), ApiError> {
        let resp = self
            .authed(self.http.delete(self.url(&format!("/chat-app/chats/group/{}", chat_id))))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse_empty(resp).await
    }

    pub async fn delete_chat(&self, chat_id: &str) -> Result<(), ApiError> {
        let resp = self
            .authed(self.http.delete(self.url(&format!("/chat-app/chats/remove/{}", chat_id))))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse_empty(resp).await
    }

    pub async fn add_participant(
        &self,
        chat_id: &str,
        participant_id: &str,
    ) -> Result<ChatListItem, ApiError> {
        let resp = self
            .authed(self.http.post(
                self.url(&format!("/chat-app/chats/group/{}/{}", chat_id, participant_id)),
            ))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn remove_participant(
        &self,
        chat_id: &str,
        participant_id: &str,
    ) -> Result<ChatListItem, ApiError> {
        let resp = self
            .authed(self.http.delete(
                self.url(&format!("/chat-app/chats/group/{}/{}", chat_id, participant_id)),
            ))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    pub async fn chat_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let resp = self
            .authed(self.http.get(self.url(&format!("/chat-app/messages/{}", chat_id))))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        self.parse(resp).await
    }

    /// Send a message. JSON when it is text only; multipart as soon as
    /// attachments ride along. The correlation id goes with it either way
    /// so the fan-out echo is attributable.
    pub async fn send_message(
        &self,
        chat_id: &str,
        content: &str,
        client_id: &str,
        attachments: &[&Path],
    ) -> Result<ChatMessage, ApiError> {
        let req = self.authed(self.http.post(self.url(&format!("/chat-app/messages/{}", chat_id))));

        let resp = if attachments.is_empty() {
            req.json(&SendMessageBody { content, client_id })
                .send()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?
        } else {
            let mut form = reqwest::multipart::Form::new().text("clientId", client_id.to_string());
            if !content.is_empty() {
                form = form.text("content", content.to_string());
            }
            for path in attachments {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| ApiError::Transport(format!("attachment read failed: {}", e)))?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("attachment")
                    .to_string();
                form = form.part(
                    "attachments",
                    reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                );
            }
            req.multipart(form)
                .send()
                .await
                .map_err(|e| ApiError::Transport(e.to_string()))?
        };

        self.parse(resp).await
    }
}

fn check_envelope_status<T>(
    http_status: u16,
    envelope: &ApiEnvelope<T>,
) -> Result<(), ApiError> {
    if http_status == 401 || http_status == 403 {
        return Err(ApiError::ForcedLogout);
    }
    if !envelope.success {
        if envelope.status_code == 401 || envelope.status_code == 403 {
            return Err(ApiError::ForcedLogout);
        }
        return Err(ApiError::Api {
            status: envelope.status_code,
            message: envelope.message.clone(),
        });
    }
    Ok(())
}

fn check_envelope<T>(http_status: u16, envelope: ApiEnvelope<T>) -> Result<T, ApiError> {
    check_envelope_status(http_status, &envelope)?;
    envelope
        .data
        .ok_or_else(|| ApiError::Decode("response envelope has no data".to_string()))
}
