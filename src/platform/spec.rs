use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A library referenced by a platform. The YAML shorthand `team/lib: "1.2.0"`
/// and the detailed form with a `server_url` override both deserialize here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "LibraryDe")]
pub struct Library {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LibraryDe {
    Version(String),
    Detailed {
        version: String,
        #[serde(default)]
        server_url: Option<String>,
    },
}

impl From<LibraryDe> for Library {
    fn from(value: LibraryDe) -> Self {
        match value {
            LibraryDe::Version(version) => Library {
                version,
                server_url: None,
            },
            LibraryDe::Detailed {
                version,
                server_url,
            } => Library {
                version,
                server_url,
            },
        }
    }
}

/// Where a blueprint's implementation lives: a plugin within a library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSource {
    /// `"team/library"` identifier, resolved against [`PlatformSpec::libraries`].
    pub library: String,
    pub plugin: String,
}

/// A typed variable declared by a platform or a blueprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(rename = "type")]
    pub var_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// How an intent subtype is implemented: plugin source, property template,
/// dependencies, per-blueprint variables, and the compute subtypes allowed
/// to consume the resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceBlueprint {
    pub plugin: PluginSource,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usable_by: Vec<String>,
}

/// An identity sub-blueprint attached to a service blueprint. The identity
/// type comes from the resolved plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityBlueprint {
    pub name: String,
    pub plugin: PluginSource,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceBlueprint {
    #[serde(flatten)]
    pub resource: ResourceBlueprint,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<IdentityBlueprint>,
}

/// The external platform definition: libraries, platform variables, and the
/// blueprint maps keyed by subtype.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub libraries: BTreeMap<String, Library>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, VariableSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ServiceBlueprint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub buckets: BTreeMap<String, ResourceBlueprint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub databases: BTreeMap<String, ResourceBlueprint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entrypoints: BTreeMap<String, ResourceBlueprint>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub infra: BTreeMap<String, ResourceBlueprint>,
}

impl PlatformSpec {
    pub fn service_blueprint(&self, subtype: &str) -> Option<&ServiceBlueprint> {
        self.services.get(subtype)
    }

    pub fn bucket_blueprint(&self, subtype: &str) -> Option<&ResourceBlueprint> {
        self.buckets.get(subtype)
    }

    pub fn database_blueprint(&self, subtype: &str) -> Option<&ResourceBlueprint> {
        self.databases.get(subtype)
    }

    pub fn entrypoint_blueprint(&self, subtype: &str) -> Option<&ResourceBlueprint> {
        self.entrypoints.get(subtype)
    }

    pub fn service_subtypes(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn bucket_subtypes(&self) -> Vec<String> {
        self.buckets.keys().cloned().collect()
    }

    pub fn database_subtypes(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    pub fn entrypoint_subtypes(&self) -> Vec<String> {
        self.entrypoints.keys().cloned().collect()
    }

    /// Library entry for a `"team/lib"` identifier.
    pub fn library(&self, id: &str) -> Option<&Library> {
        self.libraries.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_accepts_version_shorthand() {
        let yaml = "\
acme/aws: \"1.4.0\"
acme/dev:
  version: \"0.0.1\"
  server_url: http://localhost:9000
";
        let libraries: BTreeMap<String, Library> =
            serde_yaml_bw::from_str(yaml).expect("parses");
        assert_eq!(libraries["acme/aws"].version, "1.4.0");
        assert!(libraries["acme/aws"].server_url.is_none());
        assert_eq!(
            libraries["acme/dev"].server_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn platform_spec_parses_blueprint_maps() {
        let yaml = "\
name: serverless
libraries:
  acme/aws: \"1.0.0\"
services:
  default:
    plugin: {library: acme/aws, plugin: lambda}
    properties:
      memory: 512
buckets:
  default:
    plugin: {library: acme/aws, plugin: s3}
    depends_on: [infra.vpc]
infra:
  vpc:
    plugin: {library: acme/aws, plugin: vpc}
";
        let spec: PlatformSpec = serde_yaml_bw::from_str(yaml).expect("parses");
        assert_eq!(spec.name, "serverless");
        assert!(spec.service_blueprint("default").is_some());
        assert_eq!(
            spec.bucket_blueprint("default").unwrap().depends_on,
            vec!["infra.vpc"]
        );
        assert!(spec.infra.contains_key("vpc"));
    }
}
