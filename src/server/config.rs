use std::env;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Secret used to verify access-token signatures. Token issuance lives
    /// with the HTTP collaborator; both sides must share this value.
    pub access_token_secret: String,
    pub log_level: String,
    pub max_message_length: usize,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env::var("SOCKET_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SOCKET_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8081),
            access_token_secret: env::var("ACCESS_TOKEN_SECRET")
                .unwrap_or_else(|_| "ruggine-live-dev-secret".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_message_length: env::var("MAX_MESSAGE_LENGTH").ok().and_then(|v| v.parse().ok()).unwrap_or(2048),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP collaborator, e.g. `http://127.0.0.1:8080/api/v1`.
    pub api_url: String,
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8081`.
    pub socket_url: String,
    /// Directory for the durable client-side state (active-chat shadow).
    pub data_dir: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_url: env::var("CLIENT_API_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/api/v1".to_string()),
            socket_url: env::var("CLIENT_SOCKET_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:8081".to_string()),
            data_dir: env::var("CLIENT_DATA_DIR").unwrap_or_else(|_| "data".to_string()),
        }
    }
}
