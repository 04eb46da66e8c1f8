use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SugaError};

use super::store::Tokens;

const DEFAULT_AUTH_URL: &str = "https://auth.suga.dev";
const DEFAULT_CLIENT_ID: &str = "suga-cli";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    pub interval: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenError {
    error: String,
}

/// Device-code OAuth client. Polls the token endpoint at the server-issued
/// interval, honoring `slow_down` and the `expires_in` deadline.
pub struct DeviceAuthClient {
    client: reqwest::Client,
    base_url: String,
    client_id: String,
}

impl DeviceAuthClient {
    pub fn new() -> Self {
        let base_url =
            std::env::var("SUGA_AUTH_URL").unwrap_or_else(|_| DEFAULT_AUTH_URL.to_string());
        let client_id =
            std::env::var("SUGA_CLIENT_ID").unwrap_or_else(|_| DEFAULT_CLIENT_ID.to_string());
        Self::with_base_url(base_url, client_id)
    }

    pub fn with_base_url(base_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            client_id: client_id.into(),
        }
    }

    /// Starts the flow; the caller shows `user_code` / `verification_uri`.
    pub async fn begin(&self) -> Result<DeviceCode> {
        let url = format!("{}/oauth/device/code", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[("client_id", self.client_id.as_str())])
            .send()
            .await
            .map_err(|source| SugaError::Transport {
                context: "device code request".into(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(SugaError::Unauthenticated(format!(
                "device code request failed with {}",
                response.status()
            )));
        }
        response
            .json::<DeviceCode>()
            .await
            .map_err(|source| SugaError::Transport {
                context: "device code response".into(),
                source,
            })
    }

    /// Polls until the user approves, the code expires, or the server denies.
    pub async fn poll(&self, device: &DeviceCode) -> Result<Tokens> {
        let url = format!("{}/oauth/token", self.base_url);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval.max(1));

        loop {
            tokio::time::sleep(interval).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(SugaError::Unauthenticated(
                    "device code expired before approval".into(),
                ));
            }

            let response = self
                .client
                .post(&url)
                .form(&[
                    ("client_id", self.client_id.as_str()),
                    ("device_code", device.device_code.as_str()),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ])
                .send()
                .await
                .map_err(|source| SugaError::Transport {
                    context: "device token poll".into(),
                    source,
                })?;

            if response.status().is_success() {
                let token = response.json::<TokenResponse>().await.map_err(|source| {
                    SugaError::Transport {
                        context: "device token response".into(),
                        source,
                    }
                })?;
                return Ok(into_tokens(token));
            }

            let error = response
                .json::<TokenError>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| "unknown".to_string());
            match error.as_str() {
                "authorization_pending" => {}
                "slow_down" => {
                    interval += Duration::from_secs(5);
                    debug!("token endpoint asked to slow down; interval now {interval:?}");
                }
                "expired_token" => {
                    return Err(SugaError::Unauthenticated(
                        "device code expired before approval".into(),
                    ));
                }
                other => {
                    return Err(SugaError::Unauthenticated(format!(
                        "device authorization failed: {other}"
                    )));
                }
            }
        }
    }

    /// Refresh-token grant. Any failure maps to `Unauthenticated` so callers
    /// fall back to a fresh login.
    pub async fn refresh(&self, refresh_token: &str, org: Option<&str>) -> Result<Tokens> {
        let url = format!("{}/oauth/token", self.base_url);
        let mut form = vec![
            ("client_id", self.client_id.clone()),
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        if let Some(org) = org {
            form.push(("organization", org.to_string()));
        }
        let response = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|_| SugaError::Unauthenticated("token refresh failed".into()))?;
        if !response.status().is_success() {
            return Err(SugaError::Unauthenticated(format!(
                "token refresh rejected with {}",
                response.status()
            )));
        }
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|_| SugaError::Unauthenticated("token refresh failed".into()))?;
        Ok(into_tokens(token))
    }
}

impl Default for DeviceAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

fn into_tokens(response: TokenResponse) -> Tokens {
    Tokens {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at: response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
    }
}
