use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(8);
const MAX_CONSECUTIVE_RESTARTS: u32 = 5;
/// A run this long resets the restart counter.
const STABLE_RUN: Duration = Duration::from_secs(10);
const STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    Started,
    Restarting { attempt: u32 },
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Line(String),
    Status(ServiceStatus),
}

/// One item of the merged event stream. Per-service ordering follows the
/// order that service produced output; the fan-in never reorders.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub service: String,
    pub kind: EventKind,
}

impl ServiceEvent {
    /// The `[name] line` form used for terminal output.
    pub fn display_line(&self) -> String {
        match &self.kind {
            EventKind::Line(line) => format!("[{}] {line}", self.service),
            EventKind::Status(ServiceStatus::Started) => format!("[{}] started", self.service),
            EventKind::Status(ServiceStatus::Restarting { attempt }) => {
                format!("[{}] restarting (attempt {attempt})", self.service)
            }
            EventKind::Status(ServiceStatus::Exited { code }) => {
                format!("[{}] exited with code {code:?}", self.service)
            }
        }
    }
}

/// Everything needed to launch one service process.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub name: String,
    pub command: String,
    pub dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub log_path: PathBuf,
}

/// Supervises a service process: restart with bounded exponential backoff on
/// crash, SIGINT then kill on stop. The returned handle resolves only after
/// the process is gone.
pub fn spawn_supervisor(
    spec: ServiceSpec,
    events: mpsc::Sender<ServiceEvent>,
    stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(supervise(spec, events, stop))
}

async fn supervise(
    spec: ServiceSpec,
    events: mpsc::Sender<ServiceEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *stop.borrow() {
            break;
        }

        let started_at = Instant::now();
        let mut child = match launch(&spec) {
            Ok(child) => child,
            Err(err) => {
                warn!("service '{}' failed to launch: {err}", spec.name);
                emit(
                    &events,
                    &spec.name,
                    EventKind::Status(ServiceStatus::Exited { code: None }),
                )
                .await;
                return;
            }
        };
        emit(
            &events,
            &spec.name,
            EventKind::Status(ServiceStatus::Started),
        )
        .await;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(
                spec.name.clone(),
                stdout,
                events.clone(),
                spec.log_path.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(
                spec.name.clone(),
                stderr,
                events.clone(),
                spec.log_path.clone(),
            ));
        }

        let exit_code = match wait_or_stop(&mut child, &mut stop).await {
            WaitOutcome::Exited(code) => code,
            WaitOutcome::StopRequested => {
                let code = terminate(&mut child, &spec.name).await;
                for reader in readers {
                    let _ = reader.await;
                }
                emit(
                    &events,
                    &spec.name,
                    EventKind::Status(ServiceStatus::Exited { code }),
                )
                .await;
                return;
            }
        };
        for reader in readers {
            let _ = reader.await;
        }

        if *stop.borrow() {
            emit(
                &events,
                &spec.name,
                EventKind::Status(ServiceStatus::Exited { code: exit_code }),
            )
            .await;
            return;
        }

        if started_at.elapsed() >= STABLE_RUN {
            attempt = 0;
        }
        attempt += 1;
        if attempt > MAX_CONSECUTIVE_RESTARTS {
            warn!(
                "service '{}' crashed {attempt} times in a row; giving up",
                spec.name
            );
            emit(
                &events,
                &spec.name,
                EventKind::Status(ServiceStatus::Exited { code: exit_code }),
            )
            .await;
            return;
        }

        emit(
            &events,
            &spec.name,
            EventKind::Status(ServiceStatus::Restarting { attempt }),
        )
        .await;
        let backoff = backoff_for(attempt);
        debug!("service '{}' restarting in {backoff:?}", spec.name);
        tokio::select! {
            _ = sleep(backoff) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

enum WaitOutcome {
    Exited(Option<i32>),
    StopRequested,
}

/// Waits for the child to exit or for the stop signal, whichever first. The
/// child is only borrowed by the wait branch, so the caller is free to
/// terminate it afterwards.
async fn wait_or_stop(child: &mut Child, stop: &mut watch::Receiver<bool>) -> WaitOutcome {
    loop {
        tokio::select! {
            status = child.wait() => {
                return WaitOutcome::Exited(status.ok().and_then(|s| s.code()));
            }
            changed = stop.changed() => {
                // A dropped sender means the runtime is gone; wind down.
                if changed.is_err() || *stop.borrow() {
                    return WaitOutcome::StopRequested;
                }
            }
        }
    }
}

async fn emit(events: &mpsc::Sender<ServiceEvent>, service: &str, kind: EventKind) {
    let _ = events
        .send(ServiceEvent {
            service: service.to_string(),
            kind,
        })
        .await;
}

fn backoff_for(attempt: u32) -> Duration {
    let factor = 1u32 << (attempt.saturating_sub(1)).min(10);
    (BACKOFF_BASE * factor).min(BACKOFF_CAP)
}

fn launch(spec: &ServiceSpec) -> std::io::Result<Child> {
    #[cfg(unix)]
    let mut command = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&spec.command);
        c
    };
    #[cfg(not(unix))]
    let mut command = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&spec.command);
        c
    };

    command
        .current_dir(&spec.dir)
        .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own process group so the terminal's Ctrl+C reaches the supervisor, not
    // the children; shutdown is signalled explicitly.
    #[cfg(unix)]
    command.process_group(0);
    command.spawn()
}

/// SIGINT first, SIGKILL after the grace period.
async fn terminate(child: &mut Child, name: &str) -> Option<i32> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .args(["-INT", &pid.to_string()])
            .status()
            .await;
    }
    match timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => status.ok().and_then(|s| s.code()),
        Err(_) => {
            warn!("service '{name}' ignored SIGINT; killing");
            let _ = child.start_kill();
            child.wait().await.ok().and_then(|s| s.code())
        }
    }
}

fn spawn_reader<R>(
    service: String,
    stream: R,
    events: mpsc::Sender<ServiceEvent>,
    log_path: PathBuf,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
            .ok();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(log) = log.as_mut() {
                let _ = log.write_all(format!("{line}\n").as_bytes()).await;
            }
            let _ = events
                .send(ServiceEvent {
                    service: service.clone(),
                    kind: EventKind::Line(line),
                })
                .await;
        }
    })
}
