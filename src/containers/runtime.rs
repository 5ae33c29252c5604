//! Container runtime interface and its Docker CLI implementation.
//!
//! The trait exists so provisioner logic can be exercised against an
//! in-memory runtime in tests; `DockerCli` shells out to `docker` and
//! normalizes stderr into [`ContainerError`] kinds so callers never match
//! on message text.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use super::error::{ContainerError, Result};
use super::events::{EventFeedParser, RuntimeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Running,
    Exited,
}

#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub state: RuntimeState,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub image: String,
    pub working_dir: String,
    pub named_volumes: Vec<(String, String)>,
    pub env: Vec<(String, String)>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub command: Vec<String>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `None` means no container by that name exists; absence is normal
    /// control flow for the idempotency checks, not an error.
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>>;

    /// Create (without starting) and return the runtime's container id.
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn stop(&self, name: &str, grace_secs: u64) -> Result<()>;

    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Block until the container is no longer running, or fail after
    /// `timeout`.
    async fn wait_not_running(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Long-lived lifecycle event feed, shared across all runs. Events are
    /// delivered over a bounded channel; the channel closes when the feed
    /// ends.
    fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>>;
}

fn classify_stderr(stderr: &str, name: &str) -> ContainerError {
    let trimmed = stderr.trim();
    if trimmed.contains("Cannot connect to the Docker daemon") {
        ContainerError::DaemonNotRunning
    } else if trimmed.contains("permission denied") {
        ContainerError::PermissionDenied
    } else if trimmed.contains("No such container") || trimmed.contains("No such object") {
        ContainerError::NotFound(name.to_string())
    } else if trimmed.contains("is running") || trimmed.contains("running container") {
        ContainerError::StillRunning(name.to_string())
    } else {
        ContainerError::CommandFailed(trimmed.to_string())
    }
}

#[derive(Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }

    pub async fn is_available(&self) -> bool {
        Command::new("docker")
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub async fn is_daemon_running(&self) -> bool {
        Command::new("docker")
            .arg("info")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Use a local image when present, pull otherwise.
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        let inspect = Command::new("docker")
            .args(["image", "inspect", image])
            .output()
            .await?;
        if inspect.status.success() {
            tracing::info!("using local image '{image}'");
            return Ok(());
        }

        tracing::info!("pulling image '{image}'");
        let pull = Command::new("docker").args(["pull", image]).output().await?;
        if !pull.status.success() {
            let stderr = String::from_utf8_lossy(&pull.stderr);
            return Err(ContainerError::CommandFailed(format!(
                "pull of '{image}' failed: {}",
                stderr.trim()
            )));
        }
        Ok(())
    }

    pub(crate) fn build_create_args(name: &str, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-w".to_string(),
            spec.working_dir.clone(),
        ];

        for (volume, container_path) in &spec.named_volumes {
            args.push("-v".to_string());
            args.push(format!("{volume}:{container_path}"));
        }

        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }

        if let Some(cpu) = &spec.cpu_limit {
            args.push("--cpus".to_string());
            args.push(cpu.clone());
        }

        if let Some(mem) = &spec.memory_limit {
            args.push("-m".to_string());
            args.push(mem.clone());
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect(&self, name: &str) -> Result<Option<ContainerDetails>> {
        let output = Command::new("docker")
            .args(["inspect", "--format", "{{.Id}}|{{.State.Status}}", name])
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return match classify_stderr(&stderr, name) {
                ContainerError::NotFound(_) => Ok(None),
                err @ (ContainerError::DaemonNotRunning | ContainerError::PermissionDenied) => {
                    Err(err)
                }
                _ => Err(ContainerError::InspectFailed(stderr.trim().to_string())),
            };
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut parts = stdout.trim().splitn(2, '|');
        let id = parts.next().unwrap_or_default().to_string();
        let state = match parts.next().unwrap_or_default() {
            "created" => RuntimeState::Created,
            "running" | "paused" | "restarting" => RuntimeState::Running,
            _ => RuntimeState::Exited,
        };
        Ok(Some(ContainerDetails { id, state }))
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<String> {
        let args = Self::build_create_args(name, spec);
        let output = Command::new("docker").args(&args).output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return match classify_stderr(&stderr, name) {
                err @ (ContainerError::DaemonNotRunning | ContainerError::PermissionDenied) => {
                    Err(err)
                }
                _ => Err(ContainerError::CreateFailed(stderr.trim().to_string())),
            };
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let output = Command::new("docker").args(["start", name]).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ContainerError::StartFailed(stderr.trim().to_string()));
        }
        Ok(())
    }

    async fn stop(&self, name: &str, grace_secs: u64) -> Result<()> {
        let output = Command::new("docker")
            .args(["stop", "-t", &grace_secs.to_string(), name])
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return match classify_stderr(&stderr, name) {
                err @ ContainerError::NotFound(_) => Err(err),
                _ => Err(ContainerError::StopFailed(stderr.trim().to_string())),
            };
        }
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(name);

        let output = Command::new("docker").args(&args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return match classify_stderr(&stderr, name) {
                err @ (ContainerError::NotFound(_) | ContainerError::StillRunning(_)) => Err(err),
                _ => Err(ContainerError::RemoveFailed(stderr.trim().to_string())),
            };
        }
        Ok(())
    }

    async fn wait_not_running(&self, name: &str, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.inspect(name).await? {
                None => return Ok(()),
                Some(details) if details.state != RuntimeState::Running => return Ok(()),
                Some(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ContainerError::StopFailed(format!(
                    "container '{name}' still running after {}s grace",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    fn events(&self) -> Result<mpsc::Receiver<RuntimeEvent>> {
        let mut child = Command::new("docker")
            .args([
                "events",
                "--filter",
                "type=container",
                "--format",
                "{{json .}}",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            ContainerError::CommandFailed("docker events produced no stdout".to_string())
        })?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            // Holding the child here keeps kill_on_drop armed until the
            // feed task ends.
            let _child = child;
            let mut parser = EventFeedParser::new();
            let mut buf = [0u8; 4096];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        for event in parser.push(&buf[..n]) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!("runtime event feed read failed: {err}");
                        break;
                    }
                }
            }
            tracing::warn!("runtime event feed ended");
        });

        Ok(rx)
    }
}
