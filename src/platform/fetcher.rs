use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::auth::TokenProvider;
use crate::error::{Result, SugaError};
use crate::schema::Target;

use super::manifest::PluginManifest;
use super::spec::PlatformSpec;

pub const API_URL_ENV: &str = "SUGA_API_URL";
const DEFAULT_API_URL: &str = "https://api.suga.dev";

/// Full plugin closure of a platform, keyed `"team/lib/version/plugin"`.
pub type PluginIndex = HashMap<String, PluginManifest>;

pub fn plugin_key(team: &str, library: &str, version: &str, plugin: &str) -> String {
    format!("{team}/{library}/{version}/{plugin}")
}

pub fn default_base_url() -> String {
    std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string())
}

#[derive(Debug, Deserialize)]
struct BuildManifestResponse {
    platform: PlatformSpec,
    #[serde(default)]
    plugins: HashMap<String, PluginManifest>,
}

#[derive(Debug, Deserialize)]
struct ManifestEnvelope {
    manifest: PluginManifest,
}

/// Registry client. Combines the authenticated and public namespaces with an
/// adaptive order so the common case costs one request, and retrieves the
/// platform together with its plugin closure in a single `build-manifest`
/// call.
pub struct PlatformFetcher {
    client: reqwest::Client,
    base_url: String,
    provider: Option<Arc<dyn TokenProvider>>,
    current_team: Option<String>,
}

impl PlatformFetcher {
    pub fn new(
        base_url: impl Into<String>,
        provider: Option<Arc<dyn TokenProvider>>,
        current_team: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            provider,
            current_team,
        }
    }

    /// Loads the platform spec and plugin index for a target. `file:` targets
    /// bypass the registry entirely.
    pub async fn load(&self, target: &Target) -> Result<(PlatformSpec, PluginIndex)> {
        match target {
            Target::File(path) => {
                let raw = fs::read_to_string(path)?;
                let spec: PlatformSpec = serde_yaml_bw::from_str(&raw)?;
                Ok((spec, PluginIndex::new()))
            }
            Target::Registry {
                team,
                platform,
                revision,
            } => {
                let public_url = format!(
                    "{}/api/public/platforms/{team}/{platform}/revisions/{revision}/build-manifest",
                    self.base_url
                );
                let team_url = format!(
                    "{}/api/teams/{team}/platforms/{platform}/revisions/{revision}/build-manifest",
                    self.base_url
                );
                let response: BuildManifestResponse = self
                    .fetch_with_fallback(team, public_url, team_url, "platform build manifest")
                    .await?
                    .ok_or_else(|| SugaError::PlatformNotFound {
                        team: team.clone(),
                        name: platform.clone(),
                        revision: *revision,
                    })?;
                Ok((response.platform, response.plugins))
            }
        }
    }

    /// Fetches a single plugin manifest through the same namespaces.
    pub async fn get_plugin(
        &self,
        team: &str,
        library: &str,
        version: &str,
        plugin: &str,
    ) -> Result<PluginManifest> {
        let public_url = format!(
            "{}/api/public/plugin_libraries/{team}/{library}/versions/{version}/plugins/{plugin}",
            self.base_url
        );
        let team_url = format!(
            "{}/api/teams/{team}/plugin_libraries/{library}/versions/{version}/plugins/{plugin}",
            self.base_url
        );
        let envelope: ManifestEnvelope = self
            .fetch_with_fallback(team, public_url, team_url, "plugin manifest")
            .await?
            .ok_or_else(|| {
                SugaError::Other(format!(
                    "plugin {} not found in registry",
                    plugin_key(team, library, version, plugin)
                ))
            })?;
        Ok(envelope.manifest)
    }

    /// The fallback order: targeting the currently-selected team tries the
    /// authenticated endpoint first and falls through to public on
    /// `Unauthenticated` or not-found; any other team tries public first and
    /// falls through to authenticated only on a non-NotFound failure.
    /// Not-found from the second endpoint is terminal (`Ok(None)`).
    async fn fetch_with_fallback<T: DeserializeOwned>(
        &self,
        team: &str,
        public_url: String,
        team_url: String,
        context: &str,
    ) -> Result<Option<T>> {
        let authenticated_first = self.current_team.as_deref() == Some(team);
        if authenticated_first {
            match self.get_json(&team_url, true, context).await {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => debug!("{context}: not found under team namespace, trying public"),
                Err(SugaError::Unauthenticated(reason)) => {
                    debug!("{context}: unauthenticated ({reason}), trying public");
                }
                Err(err) => return Err(err),
            }
            self.get_json(&public_url, false, context).await
        } else {
            match self.get_json(&public_url, false, context).await {
                // Not-found from the public namespace is terminal here; only
                // transport/auth failures warrant the authenticated attempt.
                Ok(found) => Ok(found),
                Err(err) => {
                    debug!("{context}: public fetch failed ({err}), trying team namespace");
                    self.get_json(&team_url, true, context).await
                }
            }
        }
    }

    /// One GET with bearer injection. A 401/403 on an authenticated request
    /// triggers exactly one forced token refresh and a retry of the same
    /// request; 404 maps to `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        authenticated: bool,
        context: &str,
    ) -> Result<Option<T>> {
        let provider = if authenticated {
            Some(self.provider.as_ref().ok_or_else(|| {
                SugaError::Unauthenticated(format!(
                    "no token provider configured for authenticated {context}"
                ))
            })?)
        } else {
            None
        };

        let mut forced = false;
        loop {
            let mut request = self.client.get(url);
            if let Some(provider) = provider {
                let token = provider.get_access_token(forced).await?;
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(|source| SugaError::Transport {
                context: context.to_string(),
                source,
            })?;

            match response.status() {
                StatusCode::NOT_FOUND => return Ok(None),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    if authenticated && !forced {
                        forced = true;
                        continue;
                    }
                    return Err(SugaError::Unauthenticated(format!(
                        "registry rejected {context} with {}",
                        response.status()
                    )));
                }
                status if !status.is_success() => {
                    let source = response.error_for_status().expect_err("status is an error");
                    return Err(SugaError::Transport {
                        context: context.to_string(),
                        source,
                    });
                }
                _ => {
                    return response.json::<T>().await.map(Some).map_err(|source| {
                        SugaError::Transport {
                            context: context.to_string(),
                            source,
                        }
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builds_plugin_keys() {
        assert_eq!(
            plugin_key("acme", "aws", "1.0.0", "s3"),
            "acme/aws/1.0.0/s3"
        );
    }

    #[tokio::test]
    async fn file_targets_bypass_the_registry() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "name: local\nservices: {{}}").expect("write spec");
        let fetcher = PlatformFetcher::new("http://unused.invalid", None, None);
        let (spec, index) = fetcher
            .load(&Target::File(file.path().to_path_buf()))
            .await
            .expect("loads");
        assert_eq!(spec.name, "local");
        assert!(index.is_empty());
    }
}
