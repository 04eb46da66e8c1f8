use std::io;

use thiserror::Error;

use crate::schema::Report;

/// Cause detail for a failed blueprint reference resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceCause {
    UnknownSource,
    UnknownVariable { available: Vec<String> },
    UnknownInfra { available: Vec<String> },
    NonStringInterpolation,
    MalformedReference,
}

impl ReferenceCause {
    pub fn describe(&self) -> String {
        match self {
            ReferenceCause::UnknownSource => "unknown reference source".to_string(),
            ReferenceCause::UnknownVariable { available } => {
                format!("unknown variable (available: {})", available.join(", "))
            }
            ReferenceCause::UnknownInfra { available } => {
                format!("unknown infra resource (available: {})", available.join(", "))
            }
            ReferenceCause::NonStringInterpolation => {
                "referenced value is not string-coercible inside an interpolated string".to_string()
            }
            ReferenceCause::MalformedReference => "malformed reference".to_string(),
        }
    }
}

/// A reference token inside a blueprint that failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot resolve '${{{token}}}' at {path}: {}", .cause.describe())]
pub struct BlueprintReferenceError {
    /// The raw token text, e.g. `self.bucket_name`.
    pub token: String,
    /// Dotted location of the property being resolved.
    pub path: String,
    pub cause: ReferenceCause,
}

#[derive(Debug, Error)]
pub enum SugaError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("{report}")]
    Validation { report: Report },

    #[error("platform {team}/{name}@{revision} not found")]
    PlatformNotFound {
        team: String,
        name: String,
        revision: u64,
    },

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("no stored credentials")]
    TokenNotFound,

    #[error("transport error during {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "no blueprint for {intent_type} '{intent}' with subtype '{subtype}' (available: {})",
        .available.join(", ")
    )]
    MissingBlueprint {
        intent: String,
        intent_type: String,
        subtype: String,
        available: Vec<String>,
    },

    #[error(
        "plugin '{plugin}' requires identities [{}] but the blueprint provides [{}]",
        .required.join(", "),
        .provided.join(", ")
    )]
    MissingIdentity {
        plugin: String,
        required: Vec<String>,
        provided: Vec<String>,
    },

    #[error(
        "service '{service}' declares triggers but plugin '{plugin}' lacks the '{capability}' capability"
    )]
    CapabilityMismatch {
        service: String,
        plugin: String,
        capability: String,
    },

    #[error(transparent)]
    Reference(#[from] BlueprintReferenceError),

    #[error("panic while materializing the deployment graph: {message}")]
    BuildPanic {
        message: String,
        stack_trace: String,
    },

    #[error("no free port for {role} in {start}..{end}")]
    PortExhausted { role: String, start: u16, end: u16 },

    #[error("database did not become ready after {attempts} attempts")]
    DatabaseNotReady { attempts: u32 },

    #[error("container error: {0}")]
    Container(String),

    #[error("service '{service}' exited with code {code:?}")]
    ProcessCrashed { service: String, code: Option<i32> },

    #[error("proxy error: {0}")]
    Proxy(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_bw::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unexpected error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SugaError>;
