//! Provisioner configuration.
//!
//! Assembled once by the caller (or loaded from TOML) and passed down;
//! provisioners never read ambient process environment themselves.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub git: GitConfig,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub token_service: TokenServiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Project repositories, one per project id.
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,

    /// Ephemeral per-run worktrees.
    #[serde(default = "default_worktrees_root")]
    pub worktrees_root: PathBuf,

    /// Per-agent sandboxes holding persistent task worktrees.
    #[serde(default = "default_sandboxes_root")]
    pub sandboxes_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            projects_root: default_projects_root(),
            worktrees_root: default_worktrees_root(),
            sandboxes_root: default_sandboxes_root(),
        }
    }
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("paddock")
}

fn default_projects_root() -> PathBuf {
    data_root().join("projects")
}

fn default_worktrees_root() -> PathBuf {
    data_root().join("worktrees")
}

fn default_sandboxes_root() -> PathBuf {
    data_root().join("sandboxes")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Identity used for system commits (empty-repository init).
    #[serde(default = "default_system_name")]
    pub system_name: String,

    #[serde(default = "default_system_email")]
    pub system_email: String,

    /// Domain for synthesized per-agent author emails.
    #[serde(default = "default_agent_email_domain")]
    pub agent_email_domain: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_branch: default_branch(),
            system_name: default_system_name(),
            system_email: default_system_email(),
            agent_email_domain: default_agent_email_domain(),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_system_name() -> String {
    "Paddock".to_string()
}

fn default_system_email() -> String {
    "paddock@localhost".to_string()
}

fn default_agent_email_domain() -> String {
    "agents.localhost".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// The single shared data volume; runs are isolated by subdirectory
    /// only, which is a soft boundary, not a hard one.
    #[serde(default = "default_data_volume")]
    pub data_volume: String,

    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Extra environment injected into every container. Values of the form
    /// `$NAME` resolve against the per-request env bag (`$$` escapes a
    /// literal `$`).
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            name_prefix: default_name_prefix(),
            data_volume: default_data_volume(),
            memory_limit: default_memory_limit(),
            cpu_limit: default_cpu_limit(),
            ready_timeout_secs: default_ready_timeout_secs(),
            stop_grace_secs: default_stop_grace_secs(),
            environment: BTreeMap::new(),
        }
    }
}

fn default_image() -> String {
    "ghcr.io/paddock/run-sandbox:latest".to_string()
}

fn default_name_prefix() -> String {
    "paddock-run".to_string()
}

fn default_data_volume() -> String {
    "paddock-data".to_string()
}

fn default_memory_limit() -> String {
    "2g".to_string()
}

fn default_cpu_limit() -> String {
    "2".to_string()
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_stop_grace_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenServiceConfig {
    /// Base URL of the token service. Absent means no credentialed remotes.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProvisionerConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("parsing config from {}", path.display()))?;
        Ok(config)
    }
}

/// Resolve a configured environment value against the per-request env bag.
/// `$NAME` reads from the bag (absent means the entry is skipped); `$$NAME`
/// yields a literal `$NAME`.
pub fn resolve_env_value(value: &str, bag: &BTreeMap<String, String>) -> Option<String> {
    if let Some(rest) = value.strip_prefix("$$") {
        Some(format!("${rest}"))
    } else if let Some(name) = value.strip_prefix('$') {
        bag.get(name).cloned()
    } else {
        Some(value.to_string())
    }
}
