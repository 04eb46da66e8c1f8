use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::auth::{
    self, DeviceAuthClient, SecretStore, StoredTokenProvider, TokenProvider, TokenStore,
    ACCESS_TOKEN_ENV,
};
use crate::builder::GraphBuilder;
use crate::cli::{CliArgs, Command, PluginCommand};
use crate::error::{Result, SugaError};
use crate::fsys::OsFileSystem;
use crate::generate::{
    requests_from_app, requests_from_args, DescriptorGenerator, SdkGenerator,
};
use crate::platform::{
    default_base_url, CompositeRepository, PlatformFetcher, RegistryRepository,
};
use crate::project::{bootstrap, Project, Settings, TEMPLATES};
use crate::simulator::{DockerCli, Simulator};
use crate::{pluginserver, schema};

pub async fn run(cli: CliArgs) -> Result<()> {
    match cli.command {
        Command::Login => login().await,
        Command::Logout => logout(),
        Command::AccessToken { refresh } => access_token(refresh).await,
        Command::Init { force } => init(force),
        Command::New {
            name,
            template,
            force,
        } => new_project(name, &template, force),
        Command::Build => build().await,
        Command::Dev => dev().await,
        Command::Edit => edit(),
        Command::Templates => templates(),
        Command::Generate { args } => generate(&args),
        Command::Plugin {
            command: PluginCommand::Serve { port },
        } => plugin_serve(port).await,
        Command::Mcp => mcp(),
        Command::Team { slug } => team(slug).await,
    }
}

fn refuse_with_env_token(action: &str) -> Result<()> {
    if auth::env_token_active() {
        return Err(SugaError::Config(format!(
            "{ACCESS_TOKEN_ENV} is set; {action} is unavailable while a personal access token \
             is in effect"
        )));
    }
    Ok(())
}

async fn login() -> Result<()> {
    refuse_with_env_token("login")?;
    let oauth = DeviceAuthClient::new();
    let device = oauth.begin().await?;
    eprintln!(
        "Open {} and enter the code {}",
        device.verification_uri, device.user_code
    );
    if let Some(url) = &device.verification_uri_complete {
        eprintln!("Or open {url} directly.");
    }
    let tokens = oauth.poll(&device).await?;
    SecretStore::new().save_tokens(&tokens)?;
    eprintln!("Logged in.");
    Ok(())
}

fn logout() -> Result<()> {
    refuse_with_env_token("logout")?;
    SecretStore::new().clear()?;
    eprintln!("Logged out.");
    Ok(())
}

async fn access_token(refresh: bool) -> Result<()> {
    if auth::env_token_active() {
        if refresh {
            return Err(SugaError::Config(format!(
                "--refresh is unavailable while {ACCESS_TOKEN_ENV} is in effect"
            )));
        }
        println!("{}", std::env::var(ACCESS_TOKEN_ENV).expect("checked above"));
        return Ok(());
    }
    let provider = StoredTokenProvider::new(Arc::new(SecretStore::new()), DeviceAuthClient::new());
    let token = provider.get_access_token(refresh).await?;
    println!("{token}");
    Ok(())
}

fn init(force: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let name = cwd
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("app")
        .to_string();
    let path = bootstrap(&cwd, &name, "api-service", force)?;
    eprintln!("Created {}", path.display());
    Ok(())
}

fn new_project(name: Option<String>, template: &str, force: bool) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let (dir, name) = match name {
        Some(name) => (cwd.join(&name), name),
        None => (
            cwd.clone(),
            cwd.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("app")
                .to_string(),
        ),
    };
    let path = bootstrap(&dir, &name, template, force)?;
    eprintln!("Created {}", path.display());
    Ok(())
}

fn templates() -> Result<()> {
    for (name, _) in TEMPLATES {
        println!("{name}");
    }
    Ok(())
}

/// Loads and fully validates the project, echoing an annotated document on
/// failure.
fn load_validated(dir: &Path) -> Result<Project> {
    let (project, report) = Project::load(dir)?;
    if !report.ok() {
        eprintln!("{}", report.annotate(&project.source));
        return Err(SugaError::Validation { report });
    }
    Ok(project)
}

async fn build() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = load_validated(&cwd)?;
    let target = project.app.parsed_target().ok_or_else(|| {
        SugaError::Config("suga.yaml has no usable target after validation".into())
    })?;

    let settings = Settings::load();
    let provider = auth::default_provider();
    let fetcher = Arc::new(PlatformFetcher::new(
        default_base_url(),
        Some(provider),
        settings.current_team,
    ));
    let (platform, index) = fetcher.load(&target).await?;
    let platform = Arc::new(platform);
    let registry = Arc::new(RegistryRepository::new(
        platform.clone(),
        fetcher.clone(),
        index,
    ));
    let repo = Arc::new(CompositeRepository::new(platform.clone(), registry));

    let builder = GraphBuilder::new(
        platform,
        repo,
        Arc::new(OsFileSystem),
        project.stack_dir(),
    );
    match builder.apply(&project.app).await {
        Ok(stack_path) => {
            println!("{}", stack_path.display());
            Ok(())
        }
        Err(err @ SugaError::BuildPanic { .. }) => {
            report_panic(&project, &err);
            Err(err)
        }
        Err(err) => Err(err),
    }
}

/// Panic reports go to a timestamped file under the logs directory when one
/// can be created; otherwise the error alone reaches the user.
fn report_panic(project: &Project, err: &SugaError) {
    let SugaError::BuildPanic {
        message,
        stack_trace,
    } = err
    else {
        return;
    };
    let logs = project.logs_dir();
    if std::fs::create_dir_all(&logs).is_err() {
        return;
    }
    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let path = logs.join(format!("panic-{stamp}.log"));
    let body = format!("panic: {message}\n\n{stack_trace}\n");
    if std::fs::write(&path, body).is_ok() {
        eprintln!("panic report written to {}", path.display());
    }
}

async fn dev() -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = load_validated(&cwd)?;

    let simulator = Simulator::new(&project.root, Arc::new(DockerCli));
    let mut handle = simulator.start(&project.app).await?;

    eprintln!("resource API: {}", handle.resource_api_addr);
    for (name, url) in &handle.entrypoints {
        eprintln!("entrypoint {name}: {url}");
    }
    for (name, url) in &handle.connection_strings {
        eprintln!("database {name}: {url}");
    }
    if let Some(addr) = handle.trigger_addr {
        eprintln!("triggers: http://{addr}/schedules/<service>/<index>");
    }

    loop {
        tokio::select! {
            event = handle.events.recv() => {
                match event {
                    Some(event) => println!("{}", event.display_line()),
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("stopping...");
                break;
            }
        }
    }
    handle.stop().await
}

fn edit() -> Result<()> {
    let settings = Settings::load();
    let editor = settings.editor.unwrap_or_else(|| "default".to_string());
    // The editor session itself is provided by the companion tooling.
    eprintln!("editor sessions are handled by the suga editor integration (editor: {editor})");
    Ok(())
}

fn generate(args: &[String]) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let project = load_validated(&cwd)?;
    let requests = if args.is_empty() {
        requests_from_app(&project.app)
    } else {
        requests_from_args(args)?
    };
    if requests.is_empty() {
        return Err(SugaError::Config(
            "no languages requested and suga.yaml has no generate config".into(),
        ));
    }
    let generator = DescriptorGenerator;
    for request in &requests {
        generator.generate(&project.app, request)?;
    }
    Ok(())
}

async fn plugin_serve(port: u16) -> Result<()> {
    let cwd = std::env::current_dir()?;
    pluginserver::serve(&cwd, port).await
}

fn mcp() -> Result<()> {
    // The MCP adapter ships with the assistant tooling, not this binary.
    eprintln!("the assistant tool server is provided by the suga MCP adapter");
    Ok(())
}

async fn team(slug: Option<String>) -> Result<()> {
    let mut settings = Settings::load();
    match slug {
        None => {
            match &settings.current_team {
                Some(team) => println!("{team}"),
                None => eprintln!("no team selected"),
            }
            Ok(())
        }
        Some(slug) => {
            if !schema::NAME_RE.is_match(&slug.replace('-', "_")) {
                return Err(SugaError::Config(format!("invalid team slug '{slug}'")));
            }
            settings.current_team = Some(slug.clone());
            settings.save()?;
            if !auth::env_token_active() {
                // Re-scope the stored token to the new organization.
                let provider = StoredTokenProvider::new(
                    Arc::new(SecretStore::new()),
                    DeviceAuthClient::new(),
                );
                provider.set_organization(Some(slug.clone())).await;
                if let Err(err) = provider.get_access_token(true).await {
                    warn!("token refresh for team '{slug}' failed: {err}");
                }
            }
            eprintln!("switched to team '{slug}'");
            Ok(())
        }
    }
}
