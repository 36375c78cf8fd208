// Entry point for the ruggine_live socket tier.
use std::sync::Arc;

use log::info;
use tokio::net::TcpListener;

use ruggine_live::common::models::ChatUser;
use ruggine_live::server::config::ServerConfig;
use ruggine_live::server::directory::InMemoryDirectory;
use ruggine_live::server::rooms::RoomRegistry;
use ruggine_live::server::socket::SocketServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let registry = Arc::new(RoomRegistry::new());
    let directory = Arc::new(InMemoryDirectory::new());

    // The directory is normally fed by the HTTP collaborator; DEMO_SEED
    // preloads two users and a shared chat so the socket tier can be
    // exercised on its own.
    if std::env::var("DEMO_SEED").map(|v| v == "true" || v == "1").unwrap_or(false) {
        seed_demo_directory(&directory, &config).await;
    }

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("starting socket server on {}:{}", config.host, config.port);

    let server = Arc::new(SocketServer::new(registry, directory, config));
    server.run(listener).await?;
    Ok(())
}

async fn seed_demo_directory(directory: &InMemoryDirectory, config: &ServerConfig) {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use ruggine_live::server::auth::Claims;

    let users = [("user-alice", "alice"), ("user-bob", "bob")];
    for (id, name) in users {
        directory
            .add_user(ChatUser {
                id: id.to_string(),
                username: name.to_string(),
                email: format!("{}@example.com", name),
                avatar_url: None,
            })
            .await;
    }
    directory.add_chat_members("chat-demo", &["user-alice", "user-bob"]).await;

    let exp = (chrono::Utc::now().timestamp() + 24 * 3600) as usize;
    for (id, name) in users {
        let claims = Claims { sub: id.to_string(), exp };
        match encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(config.access_token_secret.as_bytes()),
        ) {
            Ok(token) => info!("demo token for {}: {}", name, token),
            Err(e) => log::error!("failed to mint demo token for {}: {}", name, e),
        }
    }
    info!("demo seed loaded: alice and bob share chat-demo");
}
