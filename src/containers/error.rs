use thiserror::Error;

use crate::bus::BusError;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(
        "Docker is not installed or not in PATH.\n\
         Install Docker: https://docs.docker.com/get-docker/"
    )]
    NotInstalled,

    #[error(
        "Docker daemon is not running.\n\
         Start Docker Desktop or run: sudo systemctl start docker"
    )]
    DaemonNotRunning,

    #[error(
        "Docker permission denied.\n\
         On Linux, add your user to the docker group:\n\
         sudo usermod -aG docker $USER\n\
         Then log out and back in."
    )]
    PermissionDenied,

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("container still running: {0}")]
    StillRunning(String),

    #[error("failed to create container: {0}")]
    CreateFailed(String),

    #[error("failed to start container: {0}")]
    StartFailed(String),

    #[error("failed to stop container: {0}")]
    StopFailed(String),

    #[error("failed to remove container: {0}")]
    RemoveFailed(String),

    #[error("failed to inspect container: {0}")]
    InspectFailed(String),

    #[error("container runtime command failed: {0}")]
    CommandFailed(String),

    #[error("container for run '{run_id}' did not report ready within {secs}s")]
    ReadyTimeout { run_id: String, secs: u64 },

    #[error("no container is tracked for run '{0}'")]
    UnknownRun(String),

    #[error("message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ContainerError>;
