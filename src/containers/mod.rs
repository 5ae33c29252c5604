//! Execution container lifecycle, bound one-to-one to runs.
//!
//! Containers are named deterministically from the run id so every
//! operation can resolve its container from the runtime alone; the
//! in-memory record map is an optimization, not a source of truth, and
//! stop must work without it (process restarts). Readiness and shutdown
//! travel over the message bus; out-of-band terminations are observed on
//! the runtime's lifecycle event feed.

pub mod error;
pub mod events;
pub mod runtime;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{command_channel, status_channel, BusError, CommandMessage, MessageBus,
                 StatusMessage, Subscription};
use crate::config::{resolve_env_value, ProvisionerConfig};
use error::{ContainerError, Result};
use events::{is_termination_action, RuntimeEvent};
use runtime::{ContainerRuntime, ContainerSpec, RuntimeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub run_id: String,
    pub container_id: String,
    pub name: String,
    pub status: ContainerStatus,
}

#[derive(Debug, Clone)]
pub struct ContainerRequest {
    pub run_id: String,
    pub agent_id: String,
    pub project_id: Option<String>,
    /// Subdirectory of the shared data volume holding this run's workspace.
    pub workspace_subdir: String,
    /// Caller-assembled env bag, injected verbatim.
    pub env: BTreeMap<String, String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

impl ContainerRequest {
    pub fn new(run_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        Self {
            workspace_subdir: format!("runs/{run_id}/workspace"),
            run_id,
            agent_id: agent_id.into(),
            project_id: None,
            env: BTreeMap::new(),
            cpu_limit: None,
            memory_limit: None,
        }
    }
}

pub struct ContainerProvisioner {
    config: Arc<ProvisionerConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    bus: Arc<dyn MessageBus>,
    records: Mutex<HashMap<String, ContainerInfo>>,
}

impl ContainerProvisioner {
    pub fn new(
        config: Arc<ProvisionerConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            config,
            runtime,
            bus,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn container_name(&self, run_id: &str) -> String {
        format!("{}-{run_id}", self.config.container.name_prefix)
    }

    fn run_id_for(&self, container_name: &str) -> Option<String> {
        container_name
            .strip_prefix(&self.config.container.name_prefix)?
            .strip_prefix('-')
            .map(str::to_string)
    }

    pub fn info(&self, run_id: &str) -> Option<ContainerInfo> {
        self.records
            .lock()
            .expect("record map poisoned")
            .get(run_id)
            .cloned()
    }

    pub fn active_runs(&self) -> Vec<String> {
        self.records
            .lock()
            .expect("record map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn track(&self, info: ContainerInfo) {
        self.records
            .lock()
            .expect("record map poisoned")
            .insert(info.run_id.clone(), info);
    }

    fn untrack(&self, run_id: &str) -> Option<ContainerInfo> {
        self.records
            .lock()
            .expect("record map poisoned")
            .remove(run_id)
    }

    fn set_status(&self, run_id: &str, status: ContainerStatus) {
        if let Some(info) = self
            .records
            .lock()
            .expect("record map poisoned")
            .get_mut(run_id)
        {
            info.status = status;
        }
    }

    /// Create the run's container, or adopt one that already exists under
    /// its deterministic name (process restarts, duplicate create signals).
    pub async fn create_container(&self, request: ContainerRequest) -> Result<ContainerInfo> {
        let name = self.container_name(&request.run_id);

        if let Some(details) = self.runtime.inspect(&name).await? {
            match details.state {
                RuntimeState::Running | RuntimeState::Created => {
                    let status = if details.state == RuntimeState::Running {
                        ContainerStatus::Running
                    } else {
                        ContainerStatus::Created
                    };
                    tracing::info!("adopting existing container {name} ({status:?})");
                    let info = ContainerInfo {
                        run_id: request.run_id.clone(),
                        container_id: details.id,
                        name,
                        status,
                    };
                    self.track(info.clone());
                    return Ok(info);
                }
                RuntimeState::Exited => {
                    // A dead leftover blocks the name; recreate cleanly.
                    tracing::info!("removing exited container {name} before recreation");
                    self.runtime.remove(&name, true).await?;
                }
            }
        }

        let spec = self.build_spec(&request);
        let container_id = self.runtime.create(&name, &spec).await?;
        tracing::info!("created container {name} ({container_id})");

        let info = ContainerInfo {
            run_id: request.run_id.clone(),
            container_id,
            name,
            status: ContainerStatus::Created,
        };
        self.track(info.clone());
        Ok(info)
    }

    /// Start the run's container and block until it publishes readiness.
    /// A failed start never leaves an orphaned container behind.
    pub async fn start_container(&self, run_id: &str) -> Result<()> {
        let name = match self.info(run_id) {
            Some(info) => info.name,
            None => return Err(ContainerError::UnknownRun(run_id.to_string())),
        };
        self.set_status(run_id, ContainerStatus::Starting);

        // Subscribe before issuing start: a readiness message published
        // between start and a later subscribe would be lost.
        let subscription = self.bus.subscribe(&status_channel(run_id)).await?;

        if let Err(err) = self.runtime.start(&name).await {
            subscription.close();
            self.abandon(run_id, &name).await;
            return Err(err);
        }

        match self.wait_for_ready(run_id, subscription).await {
            Ok(()) => {
                self.set_status(run_id, ContainerStatus::Running);
                tracing::info!("container for run {run_id} is ready");
                Ok(())
            }
            Err(err) => {
                self.abandon(run_id, &name).await;
                Err(err)
            }
        }
    }

    /// Every exit path closes the subscription; a leaked subscriber on the
    /// status channel is a defect.
    async fn wait_for_ready(&self, run_id: &str, mut subscription: Subscription) -> Result<()> {
        let timeout = Duration::from_secs(self.config.container.ready_timeout_secs);
        let deadline = tokio::time::Instant::now() + timeout;

        let result = loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break Err(ContainerError::ReadyTimeout {
                    run_id: run_id.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            match tokio::time::timeout(remaining, subscription.recv()).await {
                Ok(Some(payload)) => match serde_json::from_str::<StatusMessage>(&payload) {
                    Ok(StatusMessage::Ready { .. }) => {
                        self.set_status(run_id, ContainerStatus::Ready);
                        break Ok(());
                    }
                    Err(_) => {
                        tracing::debug!("ignoring unrecognized status payload for run {run_id}");
                    }
                },
                Ok(None) => {
                    break Err(ContainerError::Bus(BusError::Transport(
                        "status channel closed before readiness".to_string(),
                    )))
                }
                Err(_) => {
                    break Err(ContainerError::ReadyTimeout {
                        run_id: run_id.to_string(),
                        secs: timeout.as_secs(),
                    })
                }
            }
        };

        subscription.close();
        result
    }

    async fn abandon(&self, run_id: &str, name: &str) {
        self.untrack(run_id);
        match self.runtime.remove(name, true).await {
            Ok(()) | Err(ContainerError::NotFound(_)) => {}
            Err(err) => tracing::warn!("cleanup of failed container {name}: {err}"),
        }
    }

    /// Stop the run's container. Works without a local record: the
    /// container is resolved by its deterministic name from the runtime,
    /// covering process restarts.
    pub async fn stop_container(&self, run_id: &str, graceful: bool) -> Result<()> {
        let name = self.container_name(run_id);
        self.set_status(run_id, ContainerStatus::Stopping);

        if self.runtime.inspect(&name).await?.is_none() {
            self.untrack(run_id);
            return Ok(());
        }

        let grace_secs = self.config.container.stop_grace_secs;
        if graceful {
            let shutdown = serde_json::to_string(&CommandMessage::Shutdown {
                timestamp: Utc::now().timestamp_millis(),
            })
            .map_err(|err| BusError::Transport(err.to_string()))?;
            if let Err(err) = self.bus.publish(&command_channel(run_id), &shutdown).await {
                tracing::warn!("shutdown publish for run {run_id} failed: {err}");
            }

            let grace = Duration::from_secs(grace_secs);
            if let Err(err) = self.runtime.wait_not_running(&name, grace).await {
                tracing::debug!("graceful window for {name} elapsed: {err}");
                match self.runtime.stop(&name, grace_secs).await {
                    Ok(()) | Err(ContainerError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        } else {
            match self.runtime.stop(&name, grace_secs).await {
                Ok(()) | Err(ContainerError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        // Best-effort remove: already-gone covers a race with the
        // runtime's own auto-removal, still-running a slow teardown.
        match self.runtime.remove(&name, false).await {
            Ok(())
            | Err(ContainerError::NotFound(_))
            | Err(ContainerError::StillRunning(_)) => {}
            Err(err) => tracing::warn!("post-stop remove of {name} failed: {err}"),
        }

        self.untrack(run_id);
        Ok(())
    }

    /// Consume the runtime's lifecycle event feed and drop records for
    /// containers that die out of band. One watcher serves all runs.
    pub fn spawn_crash_watcher(
        self: &Arc<Self>,
        mut feed: mpsc::Receiver<RuntimeEvent>,
    ) -> JoinHandle<()> {
        let provisioner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                provisioner.observe_runtime_event(&event);
            }
            tracing::warn!("runtime event feed closed; crash detection inactive");
        })
    }

    /// Apply one lifecycle event. Termination of a tracked container marks
    /// it stopped and forgets it; restarting is the caller's decision.
    pub fn observe_runtime_event(&self, event: &RuntimeEvent) {
        if !is_termination_action(&event.action) {
            return;
        }
        let Some(name) = &event.name else { return };
        let Some(run_id) = self.run_id_for(name) else {
            return;
        };
        if self.untrack(&run_id).is_some() {
            tracing::warn!(
                "container for run {run_id} terminated out of band \
                 (action={}, exit_code={:?})",
                event.action,
                event.exit_code
            );
        }
    }

    fn build_spec(&self, request: &ContainerRequest) -> ContainerSpec {
        let container = &self.config.container;

        let mut env = vec![
            ("PADDOCK_RUN_ID".to_string(), request.run_id.clone()),
            ("PADDOCK_AGENT_ID".to_string(), request.agent_id.clone()),
        ];
        if let Some(project_id) = &request.project_id {
            env.push(("PADDOCK_PROJECT_ID".to_string(), project_id.clone()));
        }
        if let Some(base_url) = &self.config.token_service.base_url {
            env.push(("TOKEN_SERVICE_URL".to_string(), base_url.clone()));
        }
        for (key, value) in &container.environment {
            if let Some(resolved) = resolve_env_value(value, &request.env) {
                env.push((key.clone(), resolved));
            }
        }
        for (key, value) in &request.env {
            env.push((key.clone(), value.clone()));
        }

        ContainerSpec {
            image: container.image.clone(),
            working_dir: "/agent/workspace".to_string(),
            named_volumes: vec![(container.data_volume.clone(), "/data".to_string())],
            env,
            cpu_limit: Some(
                request
                    .cpu_limit
                    .clone()
                    .unwrap_or_else(|| container.cpu_limit.clone()),
            ),
            memory_limit: Some(
                request
                    .memory_limit
                    .clone()
                    .unwrap_or_else(|| container.memory_limit.clone()),
            ),
            command: vec![
                "bash".to_string(),
                "-lc".to_string(),
                bootstrap_script(&request.agent_id, &request.workspace_subdir),
            ],
        }
    }
}

/// Shell bootstrap embedded into every container: fixes the symlink
/// topology from shared-volume subdirectories to stable in-container
/// paths, and installs a credential helper that fetches a short-lived
/// push token at push time instead of baking a long-lived secret in.
fn bootstrap_script(agent_id: &str, workspace_subdir: &str) -> String {
    format!(
        r#"set -e
mkdir -p /data/agents/{agent_id}/home /data/agents/{agent_id}/vault /data/{workspace_subdir} /agent
ln -sfn /data/agents/{agent_id}/home /agent/home
ln -sfn /data/agents/{agent_id}/vault /agent/vault
ln -sfn /data/{workspace_subdir} /agent/workspace
cat > /usr/local/bin/git-credential-paddock <<'HELPER'
#!/bin/sh
if [ "$1" = "get" ]; then
  token=$(curl -fsS "$TOKEN_SERVICE_URL/credentials?project=$PADDOCK_PROJECT_ID" | sed -n 's/.*"token" *: *"\([^"]*\)".*/\1/p')
  echo "username=x-access-token"
  echo "password=$token"
fi
HELPER
chmod +x /usr/local/bin/git-credential-paddock
git config --global credential.helper paddock || true
exec sleep infinity
"#
    )
}
