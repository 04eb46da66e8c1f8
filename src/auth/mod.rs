//! Token acquisition and storage. The registry only ever sees an opaque
//! bearer token; everything here is replaceable behind [`TokenProvider`].

mod device;
mod store;

pub use device::{DeviceAuthClient, DeviceCode};
pub use store::{SecretStore, TokenStore, Tokens};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Result, SugaError};

/// Personal access token override. When set, the token store is bypassed and
/// `login`/`logout`/`--refresh` refuse to run.
pub const ACCESS_TOKEN_ENV: &str = "SUGA_ACCESS_TOKEN";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Returns a bearer token, refreshing first when `force_refresh` is set.
    /// Refresh failure maps to [`SugaError::Unauthenticated`].
    async fn get_access_token(&self, force_refresh: bool) -> Result<String>;
}

/// Fixed token from the environment. Refresh is a no-op: an env-provided
/// token has no refresh grant, so a forced refresh hands back the same value
/// and the caller's retry surfaces the terminal 401.
pub struct EnvTokenProvider {
    token: String,
}

impl EnvTokenProvider {
    pub fn from_env() -> Option<Self> {
        std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .map(|token| Self { token })
    }
}

#[async_trait]
impl TokenProvider for EnvTokenProvider {
    async fn get_access_token(&self, _force_refresh: bool) -> Result<String> {
        Ok(self.token.clone())
    }
}

/// Store-backed provider with refresh-on-demand through the device auth
/// client. The optional organization scopes refreshed tokens to the current
/// team.
pub struct StoredTokenProvider {
    store: Arc<dyn TokenStore>,
    oauth: DeviceAuthClient,
    organization: Mutex<Option<String>>,
}

impl StoredTokenProvider {
    pub fn new(store: Arc<dyn TokenStore>, oauth: DeviceAuthClient) -> Self {
        Self {
            store,
            oauth,
            organization: Mutex::new(None),
        }
    }

    pub async fn set_organization(&self, org: Option<String>) {
        *self.organization.lock().await = org;
    }

    async fn refresh(&self, tokens: Tokens) -> Result<Tokens> {
        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            SugaError::Unauthenticated("stored credentials have no refresh token".into())
        })?;
        let org = self.organization.lock().await.clone();
        let refreshed = self.oauth.refresh(refresh_token, org.as_deref()).await?;
        self.store.save_tokens(&refreshed)?;
        Ok(refreshed)
    }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
    async fn get_access_token(&self, force_refresh: bool) -> Result<String> {
        let tokens = match self.store.get_tokens() {
            Ok(tokens) => tokens,
            Err(SugaError::TokenNotFound) => {
                return Err(SugaError::Unauthenticated(
                    "not logged in; run `suga login`".into(),
                ));
            }
            Err(err) => return Err(err),
        };

        if force_refresh || tokens.is_expired() {
            let refreshed = self.refresh(tokens).await?;
            return Ok(refreshed.access_token);
        }
        Ok(tokens.access_token)
    }
}

/// The provider the CLI wires up: env override first, stored tokens second.
pub fn default_provider() -> Arc<dyn TokenProvider> {
    if let Some(env) = EnvTokenProvider::from_env() {
        return Arc::new(env);
    }
    Arc::new(StoredTokenProvider::new(
        Arc::new(SecretStore::new()),
        DeviceAuthClient::new(),
    ))
}

/// True when an env-provided personal access token is in effect.
pub fn env_token_active() -> bool {
    std::env::var(ACCESS_TOKEN_ENV).is_ok_and(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::store::MemoryStore;
    use super::*;

    fn provider_with(tokens: Option<Tokens>) -> StoredTokenProvider {
        StoredTokenProvider::new(
            Arc::new(MemoryStore(std::sync::Mutex::new(tokens))),
            DeviceAuthClient::with_base_url("http://127.0.0.1:1", "test-client"),
        )
    }

    #[tokio::test]
    async fn empty_store_maps_to_unauthenticated() {
        let provider = provider_with(None);
        let err = provider.get_access_token(false).await.unwrap_err();
        assert!(matches!(err, SugaError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn fresh_tokens_are_returned_without_refresh() {
        let provider = provider_with(Some(Tokens {
            access_token: "token-a".into(),
            refresh_token: None,
            expires_at: None,
        }));
        let token = provider.get_access_token(false).await.expect("token");
        assert_eq!(token, "token-a");
    }

    #[tokio::test]
    async fn forced_refresh_without_a_refresh_token_fails_cleanly() {
        let provider = provider_with(Some(Tokens {
            access_token: "token-a".into(),
            refresh_token: None,
            expires_at: None,
        }));
        let err = provider.get_access_token(true).await.unwrap_err();
        assert!(matches!(err, SugaError::Unauthenticated(_)));
    }
}
