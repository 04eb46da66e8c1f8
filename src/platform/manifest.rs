use std::collections::BTreeMap;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Capability string gating scheduled triggers.
pub const CAPABILITY_SCHEDULES: &str = "schedules";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub input_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Where the plugin's Terraform module lives: a path relative to the
/// manifest, or a URL once rewritten by an HTTP-backed repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub terraform: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputSpec>,
    pub deployment: Deployment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_identities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl ResourceManifest {
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// True when the manifest declares the named output.
    pub fn exposes_output(&self, name: &str) -> bool {
        self.outputs.contains_key(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityManifest {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, OutputSpec>,
    pub deployment: Deployment,
    pub identity_type: String,
}

/// A plugin manifest, union-typed by the `type` discriminator. Anything that
/// does not say `type: "identity"` is a resource manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PluginManifest {
    Identity(IdentityManifest),
    Resource(ResourceManifest),
}

impl PluginManifest {
    pub fn name(&self) -> &str {
        match self {
            PluginManifest::Identity(m) => &m.name,
            PluginManifest::Resource(m) => &m.name,
        }
    }

    pub fn deployment(&self) -> &Deployment {
        match self {
            PluginManifest::Identity(m) => &m.deployment,
            PluginManifest::Resource(m) => &m.deployment,
        }
    }

    pub fn terraform_mut(&mut self) -> &mut String {
        match self {
            PluginManifest::Identity(m) => &mut m.deployment.terraform,
            PluginManifest::Resource(m) => &mut m.deployment.terraform,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, PluginManifest::Identity(_))
    }

    pub fn as_resource(&self) -> Option<&ResourceManifest> {
        match self {
            PluginManifest::Resource(m) => Some(m),
            PluginManifest::Identity(_) => None,
        }
    }

    pub fn as_identity(&self) -> Option<&IdentityManifest> {
        match self {
            PluginManifest::Identity(m) => Some(m),
            PluginManifest::Resource(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for PluginManifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let is_identity = value.get("type").and_then(Value::as_str) == Some("identity");
        if is_identity {
            IdentityManifest::deserialize(value)
                .map(PluginManifest::Identity)
                .map_err(D::Error::custom)
        } else {
            ResourceManifest::deserialize(value)
                .map(PluginManifest::Resource)
                .map_err(D::Error::custom)
        }
    }
}
