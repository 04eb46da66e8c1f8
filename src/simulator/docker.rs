use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SugaError};

/// Label applied to everything the simulator creates, so cleanup and
/// idempotent re-creation can find their own resources.
pub const OWNER_LABEL: &str = "dev.suga.owner=suga";

/// Thin seam over the docker CLI. One client handle per simulator instance;
/// tests swap in a recording fake.
#[async_trait]
pub trait DockerClient: Send + Sync {
    /// Runs `docker <args>`, returning trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String>;
}

pub struct DockerCli;

#[async_trait]
impl DockerClient for DockerCli {
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!("docker {}", args.join(" "));
        let output = Command::new("docker")
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    SugaError::Container(
                        "docker binary not found on PATH; install Docker to run databases".into(),
                    )
                } else {
                    SugaError::Io(err)
                }
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SugaError::Container(format!(
                "docker {} failed (exit {:?}): {stderr}",
                args.first().copied().unwrap_or("command"),
                output.status.code(),
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Container and volume operations built on the client seam.
pub struct Docker {
    client: std::sync::Arc<dyn DockerClient>,
}

impl Docker {
    pub fn new(client: std::sync::Arc<dyn DockerClient>) -> Self {
        Self { client }
    }

    /// Volume creation is idempotent by name.
    pub async fn ensure_volume(&self, name: &str) -> Result<()> {
        self.client
            .run(&["volume", "create", "--label", OWNER_LABEL, name])
            .await?;
        Ok(())
    }

    pub async fn container_exists(&self, name: &str) -> Result<bool> {
        let filter = format!("name=^{name}$");
        let out = self
            .client
            .run(&["ps", "-aq", "--filter", &filter])
            .await?;
        Ok(!out.is_empty())
    }

    /// Starts a detached container, reusing an existing one with the same
    /// name so repeated `dev` runs keep one container and one volume.
    pub async fn run_detached(&self, name: &str, args: &[&str]) -> Result<()> {
        if self.container_exists(name).await? {
            self.client.run(&["start", name]).await?;
            return Ok(());
        }
        let mut full = vec!["run", "-d", "--name", name, "--label", OWNER_LABEL];
        full.extend_from_slice(args);
        self.client.run(&full).await?;
        Ok(())
    }

    pub async fn stop(&self, name: &str, grace_seconds: u32) -> Result<()> {
        let grace = grace_seconds.to_string();
        self.client.run(&["stop", "-t", &grace, name]).await?;
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every invocation and answers from a canned script.
    pub struct FakeDocker {
        pub calls: Mutex<Vec<Vec<String>>>,
        pub ps_output: String,
    }

    impl FakeDocker {
        pub fn new(ps_output: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                ps_output: ps_output.to_string(),
            }
        }
    }

    #[async_trait]
    impl DockerClient for FakeDocker {
        async fn run(&self, args: &[&str]) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| a.to_string()).collect());
            if args.first() == Some(&"ps") {
                return Ok(self.ps_output.clone());
            }
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeDocker;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn reuses_existing_containers() {
        let fake = Arc::new(FakeDocker::new("abc123"));
        let docker = Docker::new(fake.clone());
        docker
            .run_detached("suga-app-db", &["postgres:16"])
            .await
            .expect("starts");
        let calls = fake.calls.lock().unwrap();
        assert_eq!(calls[0][0], "ps");
        assert_eq!(calls[1], vec!["start", "suga-app-db"]);
    }

    #[tokio::test]
    async fn creates_missing_containers_with_owner_label() {
        let fake = Arc::new(FakeDocker::new(""));
        let docker = Docker::new(fake.clone());
        docker
            .run_detached("suga-app-db", &["postgres:16"])
            .await
            .expect("starts");
        let calls = fake.calls.lock().unwrap();
        let run = &calls[1];
        assert_eq!(run[0], "run");
        assert!(run.contains(&OWNER_LABEL.to_string()));
        assert!(run.contains(&"postgres:16".to_string()));
    }
}
