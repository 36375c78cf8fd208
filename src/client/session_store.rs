use std::path::PathBuf;

use keyring::Entry;

use crate::common::models::ChatListItem;

const SERVICE: &str = "ruggine_live";
const TOKEN_USER: &str = "ruggine_live_session";
const CURRENT_CHAT_FILE: &str = "current_chat.json";

/// The only two things that survive a reload: the bearer token (OS
/// keyring) and the active-chat shadow (a JSON file under the data
/// directory). Both are wiped on logout.
pub struct SessionStore {
    data_dir: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn save_token(&self, token: &str) -> anyhow::Result<()> {
        let entry = Entry::new(SERVICE, TOKEN_USER);
        match entry.set_password(token) {
            Ok(()) => Ok(()),
            Err(_e) => {
                // Keyring failed. Fall back to a local file only when
                // explicitly allowed.
                if keyring_fallback_enabled() {
                    let path = self.token_fallback_path();
                    if let Some(parent) = path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    std::fs::write(&path, token)?;
                    log::warn!("[SESSION_STORE] keyring unavailable, persisted token to fallback file");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("keyring unavailable and file fallback disabled"))
                }
            }
        }
    }

    pub fn load_token(&self) -> Option<String> {
        let entry = Entry::new(SERVICE, TOKEN_USER);
        match entry.get_password() {
            Ok(t) if !t.trim().is_empty() => Some(t),
            Ok(_) => None,
            Err(_e) => {
                if keyring_fallback_enabled() {
                    let path = self.token_fallback_path();
                    if let Ok(s) = std::fs::read_to_string(&path) {
                        let t = s.trim().to_string();
                        if !t.is_empty() {
                            return Some(t);
                        }
                    }
                }
                None
            }
        }
    }

    pub fn clear_token(&self) {
        let entry = Entry::new(SERVICE, TOKEN_USER);
        let _ = entry.delete_password();
        if keyring_fallback_enabled() {
            let path = self.token_fallback_path();
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    pub fn save_current_chat(&self, chat: &ChatListItem) -> anyhow::Result<()> {
        let path = self.current_chat_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(chat)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn load_current_chat(&self) -> Option<ChatListItem> {
        let path = self.current_chat_path();
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(chat) => Some(chat),
            Err(e) => {
                log::warn!("[SESSION_STORE] discarding unreadable chat shadow: {}", e);
                None
            }
        }
    }

    pub fn clear_current_chat(&self) {
        let path = self.current_chat_path();
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }
    }

    /// Logout: drop everything durable.
    pub fn clear_all(&self) {
        self.clear_token();
        self.clear_current_chat();
    }

    fn current_chat_path(&self) -> PathBuf {
        self.data_dir.join(CURRENT_CHAT_FILE)
    }

    fn token_fallback_path(&self) -> PathBuf {
        self.data_dir.join("session_token.txt")
    }
}

fn keyring_fallback_enabled() -> bool {
    std::env::var("KEYRING_FALLBACK").unwrap_or_default() == "true"
}
