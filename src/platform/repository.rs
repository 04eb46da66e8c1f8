use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, SugaError};

use super::fetcher::{plugin_key, PlatformFetcher, PluginIndex};
use super::manifest::{IdentityManifest, PluginManifest, ResourceManifest};
use super::spec::{PlatformSpec, PluginSource};

/// Plugin lookups as the graph builder consumes them. The library version is
/// resolved from the loaded platform spec by each implementation.
#[async_trait]
pub trait PluginRepository: Send + Sync {
    async fn get_resource_plugin(&self, source: &PluginSource) -> Result<ResourceManifest>;
    async fn get_identity_plugin(&self, source: &PluginSource) -> Result<IdentityManifest>;
}

fn split_library(source: &PluginSource) -> Result<(&str, &str)> {
    source.library.split_once('/').ok_or_else(|| {
        SugaError::Config(format!(
            "library id '{}' must look like team/library",
            source.library
        ))
    })
}

fn expect_resource(manifest: PluginManifest, source: &PluginSource) -> Result<ResourceManifest> {
    match manifest {
        PluginManifest::Resource(m) => Ok(m),
        PluginManifest::Identity(_) => Err(SugaError::Config(format!(
            "plugin '{}' from {} is an identity plugin, expected a resource plugin",
            source.plugin, source.library
        ))),
    }
}

fn expect_identity(manifest: PluginManifest, source: &PluginSource) -> Result<IdentityManifest> {
    match manifest {
        PluginManifest::Identity(m) => Ok(m),
        PluginManifest::Resource(_) => Err(SugaError::Config(format!(
            "plugin '{}' from {} is a resource plugin, expected an identity plugin",
            source.plugin, source.library
        ))),
    }
}

/// Registry-backed repository: answers from the preloaded plugin index when
/// possible, falling back to an individual manifest fetch.
pub struct RegistryRepository {
    platform: Arc<PlatformSpec>,
    fetcher: Arc<PlatformFetcher>,
    index: PluginIndex,
}

impl RegistryRepository {
    pub fn new(
        platform: Arc<PlatformSpec>,
        fetcher: Arc<PlatformFetcher>,
        index: PluginIndex,
    ) -> Self {
        Self {
            platform,
            fetcher,
            index,
        }
    }

    async fn lookup(&self, source: &PluginSource) -> Result<PluginManifest> {
        let (team, library) = split_library(source)?;
        let version = self
            .platform
            .library(&source.library)
            .ok_or_else(|| {
                SugaError::Config(format!(
                    "platform '{}' does not declare library '{}'",
                    self.platform.name, source.library
                ))
            })?
            .version
            .clone();
        let key = plugin_key(team, library, &version, &source.plugin);
        if let Some(manifest) = self.index.get(&key) {
            return Ok(manifest.clone());
        }
        debug!("plugin {key} not in the build manifest index, fetching individually");
        self.fetcher
            .get_plugin(team, library, &version, &source.plugin)
            .await
    }
}

#[async_trait]
impl PluginRepository for RegistryRepository {
    async fn get_resource_plugin(&self, source: &PluginSource) -> Result<ResourceManifest> {
        expect_resource(self.lookup(source).await?, source)
    }

    async fn get_identity_plugin(&self, source: &PluginSource) -> Result<IdentityManifest> {
        expect_identity(self.lookup(source).await?, source)
    }
}

/// Repository backed by a local plugin server (`suga plugin serve`). Relative
/// Terraform module paths in served manifests are rewritten to zip URLs under
/// the server so downstream tooling fetches module bundles over HTTP.
pub struct HttpRepository {
    platform: Arc<PlatformSpec>,
    client: reqwest::Client,
    server_url: String,
}

impl HttpRepository {
    pub fn new(platform: Arc<PlatformSpec>, server_url: impl Into<String>) -> Self {
        Self {
            platform,
            client: reqwest::Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, source: &PluginSource) -> Result<PluginManifest> {
        let (team, library) = split_library(source)?;
        let version = self
            .platform
            .library(&source.library)
            .map(|lib| lib.version.clone())
            .unwrap_or_else(|| "latest".to_string());
        let url = format!(
            "{}/api/public/plugin_libraries/{team}/{library}/versions/{version}/plugins/{}",
            self.server_url, source.plugin
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| SugaError::Transport {
                context: "local plugin server".to_string(),
                source,
            })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SugaError::Other(format!(
                "plugin '{}' not found on {}",
                source.plugin, self.server_url
            )));
        }
        let mut envelope: ManifestEnvelope =
            response
                .json()
                .await
                .map_err(|source| SugaError::Transport {
                    context: "local plugin server".to_string(),
                    source,
                })?;

        let terraform = envelope.manifest.terraform_mut();
        if terraform.starts_with("./") || terraform.starts_with("../") {
            *terraform = format!(
                "{}/terraform-modules/{}.zip",
                self.server_url, source.plugin
            );
        }
        Ok(envelope.manifest)
    }
}

#[derive(serde::Deserialize)]
struct ManifestEnvelope {
    manifest: PluginManifest,
}

#[async_trait]
impl PluginRepository for HttpRepository {
    async fn get_resource_plugin(&self, source: &PluginSource) -> Result<ResourceManifest> {
        expect_resource(self.lookup(source).await?, source)
    }

    async fn get_identity_plugin(&self, source: &PluginSource) -> Result<IdentityManifest> {
        expect_identity(self.lookup(source).await?, source)
    }
}

/// Routes each lookup by the owning library's `server_url`: libraries served
/// from a local plugin server go over HTTP, everything else hits the
/// registry-backed default. HTTP repositories are memoized per server URL.
pub struct CompositeRepository {
    platform: Arc<PlatformSpec>,
    default_repo: Arc<dyn PluginRepository>,
    local_repos: Mutex<HashMap<String, Arc<HttpRepository>>>,
}

impl CompositeRepository {
    pub fn new(platform: Arc<PlatformSpec>, default_repo: Arc<dyn PluginRepository>) -> Self {
        Self {
            platform,
            default_repo,
            local_repos: Mutex::new(HashMap::new()),
        }
    }

    async fn route(&self, source: &PluginSource) -> Result<Arc<dyn PluginRepository>> {
        let server_url = self
            .platform
            .library(&source.library)
            .and_then(|lib| lib.server_url.clone())
            .filter(|url| !url.is_empty());
        match server_url {
            None => Ok(self.default_repo.clone()),
            Some(url) => {
                let mut repos = self.local_repos.lock().await;
                let repo = repos
                    .entry(url.clone())
                    .or_insert_with(|| Arc::new(HttpRepository::new(self.platform.clone(), url)))
                    .clone();
                Ok(repo)
            }
        }
    }
}

#[async_trait]
impl PluginRepository for CompositeRepository {
    async fn get_resource_plugin(&self, source: &PluginSource) -> Result<ResourceManifest> {
        self.route(source).await?.get_resource_plugin(source).await
    }

    async fn get_identity_plugin(&self, source: &PluginSource) -> Result<IdentityManifest> {
        self.route(source).await?.get_identity_plugin(source).await
    }
}
