use clap::{Parser, Subcommand};

use crate::pluginserver::DEFAULT_PORT;

/// Top-level CLI structure.
#[derive(Debug, Parser)]
#[command(
    name = "suga",
    version,
    about = "Declarative application compiler and local development runtime.",
    long_about = "Declare services, buckets, databases, and entrypoints in suga.yaml, \
resolve them against a platform, and emit a wired deployment stack. `suga dev` stands \
the same application up locally for inner-loop development."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in to the registry via device-code authorization.
    Login,
    /// Clear stored credentials.
    Logout,
    /// Print the current access token.
    AccessToken {
        /// Force a token refresh first.
        #[arg(long)]
        refresh: bool,
    },
    /// Bootstrap a suga.yaml in the current directory.
    Init {
        /// Overwrite an existing suga.yaml.
        #[arg(long)]
        force: bool,
    },
    /// Create a new project directory from a template.
    New {
        /// Project name (also the directory created).
        name: Option<String>,
        /// Template to start from (see `suga templates`).
        #[arg(long, default_value = "api-service")]
        template: String,
        /// Overwrite an existing suga.yaml.
        #[arg(long)]
        force: bool,
    },
    /// Validate suga.yaml, resolve the target platform, and emit a stack.
    Build,
    /// Run the application locally with supervised processes.
    Dev,
    /// Open a local editor session for the project.
    Edit,
    /// List available project templates.
    Templates,
    /// Generate client SDKs (e.g. `--python --python-out clients/py`).
    Generate {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Plugin development tooling.
    Plugin {
        #[command(subcommand)]
        command: PluginCommand,
    },
    /// Start the assistant-facing tool server over stdio.
    Mcp,
    /// Show or switch the current team context.
    Team { slug: Option<String> },
}

#[derive(Subcommand, Debug)]
pub enum PluginCommand {
    /// Serve in-development plugins from the current directory over HTTP.
    Serve {
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}
