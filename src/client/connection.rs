use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::common::events::{ClientEvent, ServerEvent};

#[derive(Debug, Clone)]
pub enum ConnectionError {
    InvalidEndpoint(String),
    ConnectionFailed(String),
    NotConnected,
    SendFailed(String),
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {}", msg),
            ConnectionError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            ConnectionError::NotConnected => write!(f, "Socket not connected"),
            ConnectionError::SendFailed(msg) => write!(f, "Send failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// The client side of the socket lifecycle: one live connection per
/// session, credential supplied in the upgrade request itself, and a
/// connected/disconnected flag flipped by the transport's own signals.
/// There is no reconnection or backoff beyond what the transport gives
/// us; a reload derives a fresh connection.
pub struct ConnectionManager {
    endpoint: Url,
    token: Option<String>,
    connected: Arc<AtomicBool>,
    /// Incoming events for the application; taken once by the consumer.
    event_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
}

impl ConnectionManager {
    pub fn new(endpoint: &str) -> Result<Self, ConnectionError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ConnectionError::InvalidEndpoint(e.to_string()))?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Ok(Self {
            endpoint,
            token: None,
            connected: Arc::new(AtomicBool::new(false)),
            event_rx: Some(event_rx),
            event_tx,
            outgoing: None,
        })
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Take the incoming-event receiver; can be called only once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.event_rx.take()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Open the connection, passing the bearer token as the `token` query
    /// parameter of the upgrade request; the server reads it before it
    /// accepts the connection.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        let mut url = self.endpoint.clone();
        if let Some(token) = &self.token {
            url.query_pairs_mut().append_pair("token", token);
        }

        log::info!("[WS:CLIENT] connecting to {}", self.endpoint);
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // Outgoing pump. When the handle side goes away the websocket is
        // closed properly so the server sees the disconnect.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if ws_sender.send(message).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            let _ = ws_sender.close().await;
        });

        // Incoming pump: parse frames into events and forward them; the
        // connected flag drops with the transport.
        let event_tx = self.event_tx.clone();
        let connected = self.connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            log::debug!("[WS:CLIENT] unparseable frame ignored: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        log::debug!("[WS:CLIENT] transport error: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
            log::info!("[WS:CLIENT] disconnected");
        });

        self.outgoing = Some(out_tx);
        Ok(())
    }

    /// Send an event to the server. Typing signals are dropped locally
    /// while disconnected instead of being queued; anything else is an
    /// error the caller must see.
    pub fn send(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            if event.is_typing_signal() {
                log::debug!("[WS:CLIENT] dropping {:?} while disconnected", event);
                return Ok(());
            }
            return Err(ConnectionError::NotConnected);
        }

        let sender = self.outgoing.as_ref().ok_or(ConnectionError::NotConnected)?;
        let text = serde_json::to_string(&event)
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;
        sender
            .send(Message::Text(text))
            .map_err(|_| ConnectionError::SendFailed("outgoing channel closed".to_string()))
    }

    /// Tear the connection down by closing the outgoing pump.
    pub fn disconnect(&mut self) {
        self.outgoing = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn typing_signals_are_dropped_while_disconnected() {
        let manager = ConnectionManager::new("ws://127.0.0.1:9").unwrap();

        assert!(manager.send(ClientEvent::Typing("c1".into())).is_ok());
        assert!(manager.send(ClientEvent::StopTyping("c1".into())).is_ok());

        // Everything else must surface the missing connection.
        assert!(matches!(
            manager.send(ClientEvent::JoinChat("c1".into())),
            Err(ConnectionError::NotConnected)
        ));
    }

    #[test]
    fn rejects_a_malformed_endpoint() {
        assert!(matches!(
            ConnectionManager::new("not a url"),
            Err(ConnectionError::InvalidEndpoint(_))
        ));
    }
}
