use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SugaError};

const KEYRING_SERVICE: &str = "suga";
const KEYRING_USER: &str = "tokens";

/// A stored credential set. Serialized as JSON at rest; the value itself is
/// never logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Tokens {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // A 30 second skew keeps a token that expires mid-request from
            // being handed out.
            Some(at) => Utc::now() + chrono::Duration::seconds(30) >= at,
            None => false,
        }
    }
}

pub trait TokenStore: Send + Sync {
    /// Returns [`SugaError::TokenNotFound`] when nothing is stored.
    fn get_tokens(&self) -> Result<Tokens>;
    fn save_tokens(&self, tokens: &Tokens) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// OS-keyring-backed store with a 0600 file fallback under `~/.suga/` for
/// hosts without a usable keyring (headless CI, containers).
pub struct SecretStore {
    fallback_path: PathBuf,
}

impl SecretStore {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".suga");
        Self {
            fallback_path: base.join("credentials.json"),
        }
    }

    fn entry(&self) -> Option<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER).ok()
    }

    fn read_file(&self) -> Result<Tokens> {
        if !self.fallback_path.exists() {
            return Err(SugaError::TokenNotFound);
        }
        let raw = fs::read_to_string(&self.fallback_path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_file(&self, tokens: &Tokens) -> Result<()> {
        if let Some(parent) = self.fallback_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string(tokens)?;
        fs::write(&self.fallback_path, payload)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.fallback_path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl Default for SecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore for SecretStore {
    fn get_tokens(&self) -> Result<Tokens> {
        if let Some(entry) = self.entry() {
            match entry.get_password() {
                Ok(raw) => return Ok(serde_json::from_str(&raw)?),
                Err(keyring::Error::NoEntry) => return Err(SugaError::TokenNotFound),
                Err(err) => {
                    debug!("keyring unavailable ({err}); using file store");
                }
            }
        }
        self.read_file()
    }

    fn save_tokens(&self, tokens: &Tokens) -> Result<()> {
        let payload = serde_json::to_string(tokens)?;
        if let Some(entry) = self.entry() {
            match entry.set_password(&payload) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!("keyring unavailable ({err}); using file store");
                }
            }
        }
        self.write_file(tokens)
    }

    fn clear(&self) -> Result<()> {
        if let Some(entry) = self.entry() {
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(err) => {
                    debug!("keyring unavailable ({err}); clearing file store");
                }
            }
        }
        if self.fallback_path.exists() {
            fs::remove_file(&self.fallback_path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests.
#[cfg(test)]
pub struct MemoryStore(pub std::sync::Mutex<Option<Tokens>>);

#[cfg(test)]
impl TokenStore for MemoryStore {
    fn get_tokens(&self) -> Result<Tokens> {
        self.0
            .lock()
            .unwrap()
            .clone()
            .ok_or(SugaError::TokenNotFound)
    }

    fn save_tokens(&self, tokens: &Tokens) -> Result<()> {
        *self.0.lock().unwrap() = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.0.lock().unwrap() = None;
        Ok(())
    }
}
