//! End-to-end socket lifecycle: handshake auth, personal rooms, the
//! participancy-checked join, the typing relay and disconnect cleanup,
//! over a real listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, EncodingKey, Header};
use ruggine_live::client::connection::ConnectionManager;
use ruggine_live::common::events::{ClientEvent, ServerEvent};
use ruggine_live::common::models::ChatUser;
use ruggine_live::server::auth::Claims;
use ruggine_live::server::config::ServerConfig;
use ruggine_live::server::directory::InMemoryDirectory;
use ruggine_live::server::rooms::RoomRegistry;
use ruggine_live::server::socket::SocketServer;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;

const SECRET: &str = "socket-flow-test-secret";

fn token_for(user_id: &str) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
    let claims = Claims { sub: user_id.to_string(), exp };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes()))
        .expect("encode token")
}

fn user(id: &str) -> ChatUser {
    ChatUser {
        id: id.to_string(),
        username: id.to_string(),
        email: format!("{}@example.com", id),
        avatar_url: None,
    }
}

async fn start_server() -> (SocketAddr, Arc<RoomRegistry>, Arc<InMemoryDirectory>) {
    let registry = Arc::new(RoomRegistry::new());
    let directory = Arc::new(InMemoryDirectory::new());
    directory.add_user(user("user-alice")).await;
    directory.add_user(user("user-bob")).await;
    directory.add_user(user("user-mallory")).await;
    directory.add_chat_members("c123", &["user-alice", "user-bob"]).await;

    let config = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        access_token_secret: SECRET.to_string(),
        log_level: "info".to_string(),
        max_message_length: 2048,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = Arc::new(SocketServer::new(registry.clone(), directory.clone(), config));
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    (addr, registry, directory)
}

async fn connect_as(addr: SocketAddr, token: Option<String>) -> (ConnectionManager, UnboundedReceiver<ServerEvent>) {
    let mut conn = ConnectionManager::new(&format!("ws://{}", addr)).expect("endpoint");
    if let Some(token) = token {
        conn.set_token(token);
    }
    let events = conn.take_events().expect("events");
    conn.connect().await.expect("connect");
    (conn, events)
}

async fn recv_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

#[tokio::test]
async fn handshake_success_emits_connected_and_joins_the_personal_room() {
    let (addr, registry, _) = start_server().await;

    let (_conn, mut events) = connect_as(addr, Some(token_for("user-alice"))).await;
    assert_eq!(recv_event(&mut events).await, ServerEvent::Connected);
    assert_eq!(registry.member_count("user-alice").await, 1);
}

#[tokio::test]
async fn missing_token_gets_a_socket_error_and_no_listeners() {
    let (addr, registry, _) = start_server().await;

    let (conn, mut events) = connect_as(addr, None).await;
    match recv_event(&mut events).await {
        ServerEvent::SocketError(reason) => {
            assert!(reason.contains("Token is missing"), "unexpected reason: {}", reason)
        }
        other => panic!("expected socketError, got {:?}", other),
    }

    // The connection is open but unauthenticated: join requests fall on
    // deaf ears.
    conn.send(ClientEvent::JoinChat("c123".to_string())).expect("send on open socket");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.member_count("c123").await, 0);
}

#[tokio::test]
async fn invalid_token_gets_a_socket_error() {
    let (addr, _, _) = start_server().await;

    let (_conn, mut events) = connect_as(addr, Some("garbage-token".to_string())).await;
    match recv_event(&mut events).await {
        ServerEvent::SocketError(reason) => {
            assert!(reason.contains("Token is invalid"), "unexpected reason: {}", reason)
        }
        other => panic!("expected socketError, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_subject_gets_a_socket_error() {
    let (addr, _, _) = start_server().await;

    let (_conn, mut events) = connect_as(addr, Some(token_for("user-ghost"))).await;
    match recv_event(&mut events).await {
        ServerEvent::SocketError(reason) => {
            assert!(reason.contains("User not found"), "unexpected reason: {}", reason)
        }
        other => panic!("expected socketError, got {:?}", other),
    }
}

#[tokio::test]
async fn join_is_refused_for_non_participants() {
    let (addr, registry, _) = start_server().await;

    let (conn, mut events) = connect_as(addr, Some(token_for("user-mallory"))).await;
    assert_eq!(recv_event(&mut events).await, ServerEvent::Connected);

    conn.send(ClientEvent::JoinChat("c123".to_string())).expect("send");
    match recv_event(&mut events).await {
        ServerEvent::SocketError(reason) => {
            assert!(reason.contains("not a participant"), "unexpected reason: {}", reason)
        }
        other => panic!("expected socketError, got {:?}", other),
    }
    assert_eq!(registry.member_count("c123").await, 0);
}

#[tokio::test]
async fn typing_relay_reaches_the_peer_but_not_the_sender() {
    let (addr, registry, _) = start_server().await;

    let (alice, mut alice_events) = connect_as(addr, Some(token_for("user-alice"))).await;
    assert_eq!(recv_event(&mut alice_events).await, ServerEvent::Connected);
    let (bob, mut bob_events) = connect_as(addr, Some(token_for("user-bob"))).await;
    assert_eq!(recv_event(&mut bob_events).await, ServerEvent::Connected);

    alice.send(ClientEvent::JoinChat("c123".to_string())).expect("send");
    bob.send(ClientEvent::JoinChat("c123".to_string())).expect("send");
    for _ in 0..100 {
        if registry.member_count("c123").await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.member_count("c123").await, 2);

    alice.send(ClientEvent::Typing("c123".to_string())).expect("send");
    assert_eq!(recv_event(&mut bob_events).await, ServerEvent::Typing("c123".to_string()));

    alice.send(ClientEvent::StopTyping("c123".to_string())).expect("send");
    assert_eq!(
        recv_event(&mut bob_events).await,
        ServerEvent::StopTyping("c123".to_string())
    );

    // The sender never hears their own relay.
    assert!(alice_events.try_recv().is_err());
}

#[tokio::test]
async fn explicit_leave_stops_room_delivery() {
    let (addr, registry, _) = start_server().await;

    let (alice, mut alice_events) = connect_as(addr, Some(token_for("user-alice"))).await;
    assert_eq!(recv_event(&mut alice_events).await, ServerEvent::Connected);
    let (bob, mut bob_events) = connect_as(addr, Some(token_for("user-bob"))).await;
    assert_eq!(recv_event(&mut bob_events).await, ServerEvent::Connected);

    alice.send(ClientEvent::JoinChat("c123".to_string())).expect("send");
    bob.send(ClientEvent::JoinChat("c123".to_string())).expect("send");
    for _ in 0..100 {
        if registry.member_count("c123").await == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    bob.send(ClientEvent::LeaveChat("c123".to_string())).expect("send");
    for _ in 0..100 {
        if registry.member_count("c123").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.member_count("c123").await, 1);

    alice.send(ClientEvent::Typing("c123".to_string())).expect("send");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(bob_events.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_drops_every_room_membership() {
    let (addr, registry, _) = start_server().await;

    let (alice, mut alice_events) = connect_as(addr, Some(token_for("user-alice"))).await;
    assert_eq!(recv_event(&mut alice_events).await, ServerEvent::Connected);
    alice.send(ClientEvent::JoinChat("c123".to_string())).expect("send");
    for _ in 0..100 {
        if registry.member_count("c123").await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    drop(alice);
    drop(alice_events);
    for _ in 0..100 {
        if registry.member_count("user-alice").await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(registry.member_count("user-alice").await, 0);
    assert_eq!(registry.member_count("c123").await, 0);
}
