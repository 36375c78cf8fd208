use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::common::events::{ClientEvent, ServerEvent};
use crate::common::models::ChatUser;
use crate::server::auth::{extract_handshake_token, verify_access_token, HandshakeError};
use crate::server::config::ServerConfig;
use crate::server::directory::{ChatDirectory, UserDirectory};
use crate::server::rooms::RoomRegistry;

/// The socket tier: accepts connections, authenticates the handshake,
/// mounts the per-connection listeners and keeps the room registry in
/// sync with connection lifetimes.
pub struct SocketServer<D> {
    registry: Arc<RoomRegistry>,
    directory: Arc<D>,
    config: ServerConfig,
}

impl<D> SocketServer<D>
where
    D: UserDirectory + ChatDirectory + 'static,
{
    pub fn new(registry: Arc<RoomRegistry>, directory: Arc<D>, config: ServerConfig) -> Self {
        Self { registry, directory, config }
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        log::info!("[WS] socket server listening on {}", listener.local_addr()?);

        while let Ok((stream, addr)) = listener.accept().await {
            log::info!("[WS] new connection from {}", addr);
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream).await {
                    log::error!("[WS] connection from {} ended with error: {}", addr, e);
                }
            });
        }

        Ok(())
    }

    pub async fn handle_connection(&self, stream: TcpStream) -> anyhow::Result<()> {
        // The credential must be readable before the connection is
        // accepted, so it rides the upgrade request itself: either the
        // accessToken cookie or the token query parameter.
        let mut cookie_header: Option<String> = None;
        let mut query: Option<String> = None;
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                cookie_header = req
                    .headers()
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                query = req.uri().query().map(str::to_string);
                Ok(resp)
            },
        )
        .await?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Outbound pump: everything addressed to this connection goes
        // through the channel so room emissions never block on the socket.
        let send_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        let user = match self.authenticate(cookie_header.as_deref(), query.as_deref()).await {
            Ok(user) => user,
            Err(reason) => {
                log::warn!("[WS:AUTH] handshake refused: {}", reason);
                let error = ServerEvent::SocketError(reason.to_string());
                let _ = tx.send(Message::Text(serde_json::to_string(&error)?));
                // The connection stays open but unauthenticated; no
                // listeners are mounted, frames are drained until the
                // peer goes away.
                while let Some(frame) = ws_receiver.next().await {
                    match frame {
                        Ok(Message::Close(_)) | Err(_) => break,
                        _ => {}
                    }
                }
                drop(tx);
                let _ = send_task.await;
                return Ok(());
            }
        };

        let conn_id = Uuid::new_v4().to_string();
        self.registry.register(&conn_id, tx.clone()).await;
        // Every connection of a user joins the personal room named by the
        // user id, so events addressed to the user reach all devices.
        self.registry.join(&user.id, &conn_id).await;
        self.registry.send_to(&conn_id, &ServerEvent::Connected).await?;
        log::info!("[WS:AUTH] user {} connected ({})", user.id, conn_id);

        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if text.len() > self.config.max_message_length {
                        log::warn!("[WS:RECV] oversized frame from {} dropped", conn_id);
                        continue;
                    }
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => self.handle_event(&conn_id, &user, event).await,
                        Err(e) => {
                            log::debug!("[WS:RECV] unparseable frame from {}: {}", conn_id, e)
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    log::debug!("[WS] transport error on {}: {}", conn_id, e);
                    break;
                }
            }
        }

        self.registry.unregister(&conn_id).await;
        drop(tx);
        let _ = send_task.await;
        log::info!("[WS] user {} disconnected ({})", user.id, conn_id);
        Ok(())
    }

    async fn authenticate(
        &self,
        cookie_header: Option<&str>,
        query: Option<&str>,
    ) -> Result<ChatUser, HandshakeError> {
        let token = extract_handshake_token(cookie_header, query)
            .ok_or(HandshakeError::MissingToken)?;
        let claims = verify_access_token(&token, &self.config.access_token_secret)?;
        let user = self
            .directory
            .find_user(&claims.sub)
            .await
            .map_err(|e| HandshakeError::Internal(e.to_string()))?;
        user.ok_or(HandshakeError::UnknownUser)
    }

    /// One listener dispatch per inbound event. Failures stay inside the
    /// handler; nothing here may take the connection down.
    async fn handle_event(&self, conn_id: &str, user: &ChatUser, event: ClientEvent) {
        match event {
            ClientEvent::JoinChat(chat_id) => {
                match self.directory.is_participant(&chat_id, &user.id).await {
                    Ok(true) => {
                        self.registry.join(&chat_id, conn_id).await;
                        log::info!("[WS:ROOM] user {} joined chat {}", user.id, chat_id);
                    }
                    Ok(false) => {
                        log::warn!(
                            "[WS:ROOM] user {} refused for chat {}: not a participant",
                            user.id,
                            chat_id
                        );
                        let _ = self
                            .registry
                            .send_to(
                                conn_id,
                                &ServerEvent::SocketError(format!(
                                    "joinChat refused: not a participant of chat {}",
                                    chat_id
                                )),
                            )
                            .await;
                    }
                    Err(e) => {
                        log::error!("[WS:ROOM] participancy lookup failed: {}", e);
                        let _ = self
                            .registry
                            .send_to(
                                conn_id,
                                &ServerEvent::SocketError(
                                    "Something went wrong while joining the chat".to_string(),
                                ),
                            )
                            .await;
                    }
                }
            }
            ClientEvent::LeaveChat(chat_id) => {
                self.registry.leave(&chat_id, conn_id).await;
                log::info!("[WS:ROOM] user {} left chat {}", user.id, chat_id);
            }
            // Typing signals are a pure relay: no state, no persistence,
            // sender excluded by the broadcast primitive.
            ClientEvent::Typing(chat_id) => {
                let event = ServerEvent::Typing(chat_id.clone());
                let _ = self.registry.emit_except(&chat_id, conn_id, &event).await;
            }
            ClientEvent::StopTyping(chat_id) => {
                let event = ServerEvent::StopTyping(chat_id.clone());
                let _ = self.registry.emit_except(&chat_id, conn_id, &event).await;
            }
        }
    }
}
