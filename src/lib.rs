#![forbid(unsafe_code)]

pub mod auth;
pub mod builder;
pub mod cli;
pub mod commands;
pub mod error;
pub mod fsys;
pub mod generate;
pub mod platform;
pub mod pluginserver;
pub mod project;
pub mod refs;
pub mod schema;
pub mod simulator;
pub mod telemetry;

pub use builder::{GraphBuilder, Stack};
pub use cli::{CliArgs, Command};
pub use error::{BlueprintReferenceError, ReferenceCause, Result, SugaError};
pub use platform::{PlatformFetcher, PlatformSpec, PluginManifest, PluginRepository};
pub use project::Project;
pub use schema::{Application, Report, ValidationError};
pub use simulator::{RuntimeHandle, Simulator};
