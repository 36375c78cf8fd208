use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by an access token. Issued by the HTTP collaborator;
/// the socket tier only verifies signature and expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id the token was issued for.
    pub sub: String,
    /// Expiry as a unix timestamp.
    pub exp: usize,
}

/// Why a socket handshake was refused. Rendered into the single
/// `socketError` event; the connection itself stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    MissingToken,
    InvalidToken,
    UnknownUser,
    Internal(String),
}

impl std::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeError::MissingToken => {
                write!(f, "Un-authorized handshake. Token is missing")
            }
            HandshakeError::InvalidToken => {
                write!(f, "Un-authorized handshake. Token is invalid")
            }
            HandshakeError::UnknownUser => {
                write!(f, "Un-authorized handshake. User not found")
            }
            HandshakeError::Internal(msg) => {
                write!(f, "Something went wrong while connecting to the socket: {}", msg)
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Verify an access token's signature and expiry and return its claims.
pub fn verify_access_token(token: &str, secret: &str) -> Result<Claims, HandshakeError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        log::debug!("[WS:AUTH] token rejected: {}", e);
        HandshakeError::InvalidToken
    })
}

/// Pick the bearer token out of the upgrade request: the `accessToken`
/// cookie wins over the `token` query parameter when both are present.
pub fn extract_handshake_token(
    cookie_header: Option<&str>,
    query: Option<&str>,
) -> Option<String> {
    if let Some(cookies) = cookie_header {
        for pair in cookies.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some("accessToken") {
                if let Some(value) = parts.next() {
                    if !value.is_empty() {
                        return Some(value.to_string());
                    }
                }
            }
        }
    }

    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
