//! Local simulator: supervised service processes, a shared Postgres
//! container, the resource API, entrypoint reverse proxies, and the trigger
//! server, wired together from a validated [`Application`].

mod database;
mod docker;
mod ports;
mod proxy;
mod resource_api;
mod supervisor;
mod triggers;

pub use database::{sanitize_volume_name, DatabaseServer, POSTGRES_IMAGE};
pub use docker::{Docker, DockerCli, DockerClient, OWNER_LABEL};
pub use ports::{release_port, reserve_port, PortRole};
pub use proxy::{EntrypointProxy, ProxyRoute, Upstream};
pub use resource_api::{ResourceApi, HOST_ENV, PORT_ENV};
pub use supervisor::{
    spawn_supervisor, EventKind, ServiceEvent, ServiceSpec, ServiceStatus,
};
pub use triggers::{Schedule, TriggerServer, TriggerTarget};

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;
use crate::schema::Application;

const EVENT_CAPACITY: usize = 256;

pub struct Simulator {
    project_dir: PathBuf,
    docker: Arc<dyn DockerClient>,
}

/// Live endpoints and controls of a running simulation. `stop` is
/// idempotent and returns only after every supervisor task has exited.
pub struct RuntimeHandle {
    pub events: mpsc::Receiver<ServiceEvent>,
    /// Entrypoint name → local URL.
    pub entrypoints: BTreeMap<String, String>,
    pub resource_api_addr: SocketAddr,
    pub trigger_addr: Option<SocketAddr>,
    /// Database intent name → connection string.
    pub connection_strings: BTreeMap<String, String>,
    stop: watch::Sender<bool>,
    supervisors: Vec<JoinHandle<()>>,
    database: Option<DatabaseServer>,
    resource_api: ResourceApi,
    proxies: Vec<EntrypointProxy>,
    triggers: Option<TriggerServer>,
    stopped: bool,
}

impl RuntimeHandle {
    /// Stop order: signal services, join every supervisor, stop the database
    /// container, then tear down the HTTP servers. Cleanup past the
    /// supervisors is best-effort.
    pub async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let _ = self.stop.send(true);
        for supervisor in self.supervisors.drain(..) {
            let _ = supervisor.await;
        }
        if let Some(database) = &self.database {
            if let Err(err) = database.stop().await {
                warn!("database container stop failed: {err}");
            }
        }
        for proxy in &self.proxies {
            proxy.shutdown();
        }
        if let Some(triggers) = &self.triggers {
            triggers.shutdown();
        }
        self.resource_api.shutdown();
        info!("simulator stopped");
        Ok(())
    }
}

impl Simulator {
    pub fn new(project_dir: impl Into<PathBuf>, docker: Arc<dyn DockerClient>) -> Self {
        Self {
            project_dir: project_dir.into(),
            docker,
        }
    }

    /// Stands the application up locally and returns the runtime handle.
    pub async fn start(&self, app: &Application) -> Result<RuntimeHandle> {
        let api_port = match std::env::var(PORT_ENV).ok().and_then(|p| p.parse().ok()) {
            Some(port) => port,
            None => reserve_port(PortRole::ResourceApi)?,
        };
        let resource_api = ResourceApi::start(self.project_dir.join(".suga/storage"), api_port)
            .await?;

        let mut connection_strings = BTreeMap::new();
        let database = if app.databases.is_empty() {
            None
        } else {
            let db_port = reserve_port(PortRole::Database)?;
            let server =
                DatabaseServer::start(self.docker.clone(), &app.name, db_port).await?;
            for name in app.databases.keys() {
                server.create_database(name).await?;
                connection_strings.insert(name.clone(), server.connection_string(name));
            }
            Some(server)
        };

        let logs_dir = self.project_dir.join("logs");
        std::fs::create_dir_all(&logs_dir)?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);

        // Ports first, so entrypoint routes and trigger targets can be wired
        // before any service starts.
        let mut service_ports: BTreeMap<String, u16> = BTreeMap::new();
        for name in app.services.keys() {
            service_ports.insert(name.clone(), reserve_port(PortRole::Service)?);
        }

        let mut supervisors = Vec::new();
        for (name, intent) in &app.services {
            let Some(dev) = &intent.dev else {
                warn!("service '{name}' has no dev command; skipping");
                continue;
            };
            let port = service_ports[name];

            let mut env: Vec<(String, String)> = intent
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            env.push((HOST_ENV.into(), "127.0.0.1".into()));
            env.push((PORT_ENV.into(), resource_api.addr.port().to_string()));
            env.push(("PORT".into(), port.to_string()));
            for (db_name, database) in &app.databases {
                if database.access.contains_key(name) {
                    if let Some(url) = connection_strings.get(db_name) {
                        env.push((database.env_var_key.clone(), url.clone()));
                    }
                }
            }

            let dir = match &dev.dir {
                Some(dir) => self.project_dir.join(dir),
                None => self.project_dir.clone(),
            };
            let spec = ServiceSpec {
                name: name.clone(),
                command: dev.command.clone(),
                dir,
                env,
                log_path: logs_dir.join(format!("{name}.log")),
            };
            supervisors.push(spawn_supervisor(spec, events_tx.clone(), stop_rx.clone()));
        }

        let mut proxies = Vec::new();
        let mut entrypoints = BTreeMap::new();
        for (name, intent) in &app.entrypoints {
            let mut routes = Vec::new();
            for (prefix, route) in &intent.routes {
                let upstream = if let Some(port) = service_ports.get(&route.target_name) {
                    Upstream::Service {
                        port: *port,
                        base_path: route.base_path.clone().unwrap_or_else(|| "/".into()),
                    }
                } else {
                    Upstream::Bucket {
                        resource_api: resource_api.addr,
                        bucket: route.target_name.clone(),
                    }
                };
                routes.push(ProxyRoute {
                    prefix: prefix.clone(),
                    upstream,
                });
            }
            let port = reserve_port(PortRole::Entrypoint)?;
            let proxy = EntrypointProxy::start(name, port, routes).await?;
            entrypoints.insert(name.clone(), proxy.url());
            proxies.push(proxy);
        }

        let mut trigger_targets: HashMap<String, TriggerTarget> = HashMap::new();
        for (name, intent) in &app.services {
            if intent.triggers.is_empty() {
                continue;
            }
            // BTreeMap keeps trigger names sorted, which fixes each
            // schedule's index.
            let schedules = intent
                .triggers
                .iter()
                .map(|(trigger, spec)| Schedule {
                    name: trigger.clone(),
                    path: spec
                        .path
                        .clone()
                        .unwrap_or_else(|| format!("/schedules/{trigger}")),
                })
                .collect();
            trigger_targets.insert(
                name.clone(),
                TriggerTarget {
                    port: service_ports[name],
                    schedules,
                },
            );
        }
        let (triggers, trigger_addr) = if trigger_targets.is_empty() {
            (None, None)
        } else {
            let port = reserve_port(PortRole::Trigger)?;
            let server = TriggerServer::start(port, trigger_targets).await?;
            let addr = server.addr;
            (Some(server), Some(addr))
        };

        info!(
            "simulator up: {} service(s), {} entrypoint(s), resource API at {}",
            supervisors.len(),
            entrypoints.len(),
            resource_api.addr
        );

        Ok(RuntimeHandle {
            events: events_rx,
            entrypoints,
            resource_api_addr: resource_api.addr,
            trigger_addr,
            connection_strings,
            stop: stop_tx,
            supervisors,
            database,
            resource_api,
            proxies,
            triggers,
            stopped: false,
        })
    }
}
