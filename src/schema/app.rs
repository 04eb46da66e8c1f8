use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// `^team/platform@revision` registry reference.
pub static TARGET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*/[a-z][a-z0-9-]*@\d+$").expect("target regex"));

/// Intent identifiers are snake_case.
pub static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("name regex"));

/// Identifiers the platform claims for itself.
pub const RESERVED_NAMES: &[&str] = &["backend", "suga", "default"];

/// A parsed application target: either a registry revision or a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Registry {
        team: String,
        platform: String,
        revision: u64,
    },
    File(PathBuf),
}

impl Target {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(path) = raw.strip_prefix("file:") {
            if path.is_empty() {
                return None;
            }
            return Some(Target::File(PathBuf::from(path)));
        }
        if !TARGET_RE.is_match(raw) {
            return None;
        }
        let (team, rest) = raw.split_once('/')?;
        let (platform, revision) = rest.split_once('@')?;
        Some(Target::Registry {
            team: team.to_string(),
            platform: platform.to_string(),
            revision: revision.parse().ok()?,
        })
    }
}

/// Actions a service may be granted on a bucket or database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessAction {
    Read,
    Write,
    Delete,
    All,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Read => "read",
            AccessAction::Write => "write",
            AccessAction::Delete => "delete",
            AccessAction::All => "all",
        }
    }

    /// Expands `all` into the concrete actions, sorted and deduplicated.
    pub fn expand(actions: &[AccessAction]) -> Vec<AccessAction> {
        let mut out: Vec<AccessAction> = Vec::new();
        for action in actions {
            match action {
                AccessAction::All => {
                    out.extend([AccessAction::Read, AccessAction::Write, AccessAction::Delete])
                }
                other => out.push(*other),
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Reference to a pre-built container image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A docker build recipe for a service container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerSpec {
    pub dockerfile: String,
    pub context: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
}

/// Exactly one of `image` / `docker`; enforced by the structural validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<DockerSpec>,
}

/// A cron-shaped trigger attached to a service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Local invocation command used by `suga dev`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevSpec {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub container: Container,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub triggers: BTreeMap<String, TriggerSpec>,
    #[serde(
        default,
        rename = "usable-by",
        skip_serializing_if = "Option::is_none"
    )]
    pub usable_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_library_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub access: BTreeMap<String, Vec<AccessAction>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub env_var_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub access: BTreeMap<String, Vec<AccessAction>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(alias = "target")]
    pub target_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntrypointIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub routes: BTreeMap<String, Route>,
}

/// Client SDK generation settings, read by `suga generate` when no
/// per-language flags are passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateTarget {
    pub output: String,
}

/// The typed intent document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub services: IndexMap<String, ServiceIntent>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub buckets: IndexMap<String, BucketIntent>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub databases: IndexMap<String, DatabaseIntent>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub entrypoints: IndexMap<String, EntrypointIntent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate: Option<BTreeMap<String, GenerateTarget>>,
}

impl Application {
    /// The parsed target, if present and well-formed.
    pub fn parsed_target(&self) -> Option<Target> {
        self.target.as_deref().and_then(Target::parse)
    }

    /// Intent identifiers in sorted order with their kind, used wherever the
    /// builder or simulator needs deterministic iteration.
    pub fn sorted_intent_names(&self) -> Vec<(String, IntentKind)> {
        let mut names: Vec<(String, IntentKind)> = Vec::new();
        names.extend(
            self.services
                .keys()
                .map(|n| (n.clone(), IntentKind::Service)),
        );
        names.extend(self.buckets.keys().map(|n| (n.clone(), IntentKind::Bucket)));
        names.extend(
            self.databases
                .keys()
                .map(|n| (n.clone(), IntentKind::Database)),
        );
        names.extend(
            self.entrypoints
                .keys()
                .map(|n| (n.clone(), IntentKind::Entrypoint)),
        );
        names.sort();
        names
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntentKind {
    Service,
    Bucket,
    Database,
    Entrypoint,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Service => "service",
            IntentKind::Bucket => "bucket",
            IntentKind::Database => "database",
            IntentKind::Entrypoint => "entrypoint",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_target() {
        let target = Target::parse("acme/serverless@3").expect("valid target");
        assert_eq!(
            target,
            Target::Registry {
                team: "acme".into(),
                platform: "serverless".into(),
                revision: 3,
            }
        );
    }

    #[test]
    fn parses_file_target() {
        let target = Target::parse("file:./platform.yaml").expect("valid target");
        assert_eq!(target, Target::File(PathBuf::from("./platform.yaml")));
    }

    #[test]
    fn rejects_malformed_targets() {
        for raw in ["invalid", "acme/platform", "acme/platform@", "Acme/p@1", "file:"] {
            assert!(Target::parse(raw).is_none(), "{raw} should not parse");
        }
    }

    #[test]
    fn all_expands_deterministically() {
        let expanded = AccessAction::expand(&[AccessAction::All, AccessAction::Read]);
        assert_eq!(
            expanded,
            vec![AccessAction::Read, AccessAction::Write, AccessAction::Delete]
        );
    }
}
