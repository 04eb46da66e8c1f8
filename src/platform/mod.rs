//! Platform specs, plugin manifests, and their retrieval.

mod fetcher;
mod manifest;
mod repository;
mod spec;

pub use fetcher::{default_base_url, plugin_key, PlatformFetcher, PluginIndex, API_URL_ENV};
pub use manifest::{
    Deployment, IdentityManifest, InputSpec, OutputSpec, PluginManifest, ResourceManifest,
    CAPABILITY_SCHEDULES,
};
pub use repository::{CompositeRepository, HttpRepository, PluginRepository, RegistryRepository};
pub use spec::{
    IdentityBlueprint, Library, PlatformSpec, PluginSource, ResourceBlueprint, ServiceBlueprint,
    VariableSpec,
};
