//! Git worktree workspace provisioning for agent runs.
//!
//! One project repository serves many concurrent runs, each checked out into
//! its own worktree on its own branch. All mutating git operations on a
//! project are serialized through [`KeyedLocks`]; unrelated projects proceed
//! in parallel. Recovery rules: locally-fixable debris (orphaned run
//! branches, stale worktree metadata, leftover lock files) is corrected in
//! place, while anything that could destroy unsaved agent work (a corrupted
//! worktree, a missing remote where one is required) is raised to the
//! caller.

pub mod error;
pub mod git_cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::ProvisionerConfig;
use crate::credentials::{authenticated_url, GitCredential, TokenClient};
use crate::lock::KeyedLocks;
use error::{Result, WorkspaceError};
use git_cli::GitCli;

/// Caller-supplied mapping from project id to remote URL.
#[async_trait]
pub trait RepoLookup: Send + Sync {
    async fn repo_url(&self, project_id: &str) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunWorkspace {
    pub path: PathBuf,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskWorkspace {
    pub path: PathBuf,
    pub branch: String,
    pub already_exists: bool,
}

#[derive(Debug)]
pub struct PushOutcome {
    pub pushed: bool,
    /// False when the project has no remote at all, which is a distinct
    /// non-failure outcome, not an error.
    pub has_remote: bool,
    pub branch: String,
    pub commit: Option<String>,
    pub error: Option<WorkspaceError>,
}

#[derive(Debug)]
pub struct FinalizeReport {
    pub cleaned: bool,
    pub summary: Option<String>,
    pub branch: Option<String>,
    pub error: Option<WorkspaceError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConflict {
    pub branch: String,
    pub error: String,
}

#[derive(Debug)]
pub struct MergeReport {
    pub target: String,
    pub success: bool,
    pub merged: Vec<String>,
    pub conflicts: Vec<MergeConflict>,
    pub pushed: bool,
}

pub fn run_branch(run_id: &str) -> String {
    format!("run/{run_id}")
}

pub fn task_branch(task_id: &str, slug: Option<&str>) -> String {
    match slug.map(slugify).filter(|s| !s.is_empty()) {
        Some(slug) => format!("feat/{task_id}-{slug}"),
        None => format!("feat/{task_id}"),
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::new();
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    slug.chars().take(40).collect()
}

pub struct WorkspaceProvisioner {
    config: Arc<ProvisionerConfig>,
    git: GitCli,
    locks: KeyedLocks,
    tokens: Arc<dyn TokenClient>,
    repo_lookup: Option<Arc<dyn RepoLookup>>,
}

impl WorkspaceProvisioner {
    pub fn new(config: Arc<ProvisionerConfig>, tokens: Arc<dyn TokenClient>) -> Self {
        Self {
            config,
            git: GitCli::new(),
            locks: KeyedLocks::new(),
            tokens,
            repo_lookup: None,
        }
    }

    pub fn with_repo_lookup(mut self, lookup: Arc<dyn RepoLookup>) -> Self {
        self.repo_lookup = Some(lookup);
        self
    }

    pub fn project_path(&self, project_id: &str) -> PathBuf {
        self.config.paths.projects_root.join(project_id)
    }

    pub fn run_worktree_path(&self, run_id: &str) -> PathBuf {
        self.config.paths.worktrees_root.join(run_id)
    }

    pub fn task_worktree_path(&self, agent_id: &str, task_id: &str) -> PathBuf {
        self.config
            .paths
            .sandboxes_root
            .join(agent_id)
            .join("tasks")
            .join(task_id)
    }

    /// Idempotent clone-or-init of the project repository.
    pub async fn ensure_project_repository(
        &self,
        project_id: &str,
        repo_url: Option<&str>,
    ) -> Result<PathBuf> {
        let _guard = self.locks.acquire(project_id).await;
        self.ensure_repository_locked(project_id, repo_url).await
    }

    // Caller must hold the project lock.
    async fn ensure_repository_locked(
        &self,
        project_id: &str,
        repo_url: Option<&str>,
    ) -> Result<PathBuf> {
        let path = self.project_path(project_id);
        if path.join(".git").exists() {
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = match repo_url {
            Some(url) => Some(url.to_string()),
            None => match &self.repo_lookup {
                Some(lookup) => lookup.repo_url(project_id).await,
                None => None,
            },
        };

        match url {
            Some(url) => {
                let credential = self.tokens.credential_for_url(&url).await?;
                let clone_url = with_credential(&url, credential.as_ref());
                tracing::info!("cloning {url} for project {project_id}");
                if let Err(err) = self.git.clone(&clone_url, &path).await {
                    // Leave no partial clone behind.
                    let _ = tokio::fs::remove_dir_all(&path).await;
                    return Err(err.into());
                }
                if credential.is_some() {
                    self.git.set_remote_url(&path, &url).await?;
                }
            }
            None => {
                // Repository-less runs still get worktrees: an empty
                // repository with a single empty commit under the system
                // identity is enough to branch from.
                self.git.init(&path, &self.config.git.default_branch).await?;
                self.git
                    .commit_allow_empty(
                        &path,
                        "Initialize project repository",
                        &self.config.git.system_name,
                        &self.config.git.system_email,
                    )
                    .await?;
                tracing::info!("initialized empty repository for project {project_id}");
            }
        }

        Ok(path)
    }

    /// Create (or idempotently reuse) the worktree for one run. The whole
    /// flow holds the project lock.
    pub async fn create_run_workspace(
        &self,
        project_id: &str,
        run_id: &str,
        repo_url: Option<&str>,
        task_branch: Option<&str>,
    ) -> Result<RunWorkspace> {
        let _guard = self.locks.acquire(project_id).await;
        let repo = self.ensure_repository_locked(project_id, repo_url).await?;

        let branch = match task_branch {
            Some(branch) => branch.to_string(),
            None => run_branch(run_id),
        };
        let path = self.run_worktree_path(run_id);

        if path.exists() {
            self.validate_existing_worktree(&path, &branch).await?;
            tracing::info!(
                "reusing worktree for run {run_id} at {} on '{branch}'",
                path.display()
            );
            return Ok(RunWorkspace { path, branch });
        }

        let remote = self.git.remote_url(&repo).await?;
        if task_branch.is_some() && remote.is_none() {
            return Err(WorkspaceError::Validation(format!(
                "task branch '{branch}' requires project '{project_id}' to have a remote: \
                 without one, pushed task work would be unrecoverable"
            )));
        }

        // Best-effort refresh; a stale default branch is not worth failing
        // the run over.
        if let Some(url) = &remote {
            let credential = self
                .tokens
                .credential_for_project(project_id)
                .await
                .ok()
                .flatten();
            let fetch_url = with_credential(url, credential.as_ref());
            if let Err(err) = self.git.fetch_prune_from(&repo, &fetch_url).await {
                tracing::debug!("fetch for project {project_id} skipped: {err}");
            }
            if let Err(err) = self.git.pull_ff_only(&repo).await {
                tracing::debug!("ff-only pull for project {project_id} skipped: {err}");
            }
        }
        if let Err(err) = self.git.worktree_prune(&repo).await {
            tracing::debug!("worktree prune for project {project_id} skipped: {err}");
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if branch_exists_local(&repo, &branch)? {
            if task_branch.is_some() {
                // Continuation of earlier task work.
                self.git.worktree_add(&repo, &path, &branch).await?;
            } else {
                // An ephemeral run branch with no live worktree is an
                // orphan from a crashed run.
                tracing::warn!("recreating orphaned run branch '{branch}'");
                self.git.branch_delete(&repo, &branch).await?;
                self.git.worktree_add_new_branch(&repo, &path, &branch).await?;
            }
        } else if branch_exists_remote(&repo, &branch)? {
            // Pushed by an earlier run or a different agent.
            self.git.worktree_add_tracking(&repo, &path, &branch).await?;
        } else {
            self.git.worktree_add_new_branch(&repo, &path, &branch).await?;
        }

        tracing::info!(
            "created worktree for run {run_id} at {} on '{branch}'",
            path.display()
        );
        Ok(RunWorkspace { path, branch })
    }

    /// Persistent worktree under the agent's sandbox, surviving across
    /// run/wake cycles on the same task branch.
    pub async fn create_task_workspace(
        &self,
        agent_id: &str,
        project_id: &str,
        task_id: &str,
        task_branch: &str,
    ) -> Result<TaskWorkspace> {
        let _guard = self.locks.acquire(project_id).await;
        let repo = self.ensure_repository_locked(project_id, None).await?;

        let Some(remote) = self.git.remote_url(&repo).await? else {
            return Err(WorkspaceError::Validation(format!(
                "task workspace for '{task_id}' requires project '{project_id}' to have a \
                 remote: without one, pushed task work would be unrecoverable"
            )));
        };

        let path = self.task_worktree_path(agent_id, task_id);
        if path.exists() {
            self.validate_existing_worktree(&path, task_branch).await?;
            // A process killed mid-operation leaves lock files that would
            // wedge every future git command in this workspace.
            self.clear_stale_lock_files(&repo, &path).await;
            return Ok(TaskWorkspace {
                path,
                branch: task_branch.to_string(),
                already_exists: true,
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Fetch first so a branch pushed by a different agent or run is
        // visible before we decide how to create ours.
        let credential = self.tokens.credential_for_url(&remote).await.ok().flatten();
        let fetch_url = with_credential(&remote, credential.as_ref());
        if let Err(err) = self.git.fetch_prune_from(&repo, &fetch_url).await {
            tracing::debug!("fetch for task {task_id} skipped: {err}");
        }

        if branch_exists_local(&repo, task_branch)? {
            self.git.worktree_add(&repo, &path, task_branch).await?;
        } else if branch_exists_remote(&repo, task_branch)? {
            self.git
                .worktree_add_tracking(&repo, &path, task_branch)
                .await?;
        } else {
            self.git
                .worktree_add_new_branch(&repo, &path, task_branch)
                .await?;
        }

        tracing::info!(
            "created task workspace for {agent_id}/{task_id} at {}",
            path.display()
        );
        Ok(TaskWorkspace {
            path,
            branch: task_branch.to_string(),
            already_exists: false,
        })
    }

    /// Stage and commit everything in the workspace under the acting
    /// agent's identity. Returns `None` when the tree is clean. Holds the
    /// project lock: the commit updates a ref in the shared repository.
    pub async fn commit_step(
        &self,
        path: &Path,
        step_id: &str,
        agent_id: &str,
        summary: &str,
    ) -> Result<Option<String>> {
        let key = self.project_key_for(path, None).await?;
        let _guard = self.locks.acquire(&key).await;

        self.git.add_all(path).await?;
        if self.git.status_porcelain(path).await?.is_empty() {
            return Ok(None);
        }

        let author = format!(
            "{agent_id} <{agent_id}@{}>",
            self.config.git.agent_email_domain
        );
        let message = format!("{summary}\n\nStep: {step_id}\nAgent: {agent_id}");
        self.git
            .commit(
                path,
                &message,
                &author,
                &self.config.git.system_name,
                &self.config.git.system_email,
            )
            .await?;

        let commit = self.git.rev_parse_head(path).await?;
        tracing::debug!("committed step {step_id} as {commit}");
        Ok(Some(commit))
    }

    /// Push the workspace's branch. Holds the project lock: the remote URL
    /// swap-and-restore around a credentialed push must not interleave with
    /// another operation on the same repository.
    pub async fn push_branch(
        &self,
        run_id: &str,
        project_id: Option<&str>,
    ) -> Result<PushOutcome> {
        let path = self.run_worktree_path(run_id);
        if !path.exists() {
            return Err(WorkspaceError::Validation(format!(
                "no workspace exists for run '{run_id}'"
            )));
        }
        let key = self.project_key_for(&path, project_id).await?;
        let _guard = self.locks.acquire(&key).await;
        self.push_from(&path, project_id).await
    }

    // Caller must hold the project lock.
    async fn push_from(&self, dir: &Path, project_id: Option<&str>) -> Result<PushOutcome> {
        let branch = self.git.current_branch(dir).await?;
        let commit = self.git.rev_parse_head(dir).await.ok();

        let Some(clean_url) = self.git.remote_url(dir).await? else {
            return Ok(PushOutcome {
                pushed: false,
                has_remote: false,
                branch,
                commit,
                error: None,
            });
        };

        let credential = match project_id {
            Some(project_id) => self.tokens.credential_for_project(project_id).await?,
            None => self.tokens.credential_for_url(&clean_url).await?,
        };
        let authed_url = credential
            .as_ref()
            .and_then(|c| authenticated_url(&clean_url, &c.token));

        if let Some(url) = &authed_url {
            self.git.set_remote_url(dir, url).await?;
        }
        let result = self.git.push(dir, &branch).await;
        // Success or failure, the credential never stays in config.
        if authed_url.is_some() {
            if let Err(err) = self.git.set_remote_url(dir, &clean_url).await {
                tracing::warn!("failed to restore credential-free remote URL: {err}");
            }
        }

        match result {
            Ok(()) => Ok(PushOutcome {
                pushed: true,
                has_remote: true,
                branch,
                commit,
                error: None,
            }),
            Err(err) => Ok(PushOutcome {
                pushed: false,
                has_remote: true,
                branch,
                commit,
                error: Some(err.into()),
            }),
        }
    }

    /// Push, then decide cleanup: a worktree whose push failed while a
    /// remote exists is preserved so the commits survive for a retry. The
    /// push and the worktree removal both run under the project lock.
    pub async fn finalize_run_workspace(
        &self,
        run_id: &str,
        project_id: Option<&str>,
    ) -> Result<FinalizeReport> {
        let path = self.run_worktree_path(run_id);
        if !path.exists() {
            tracing::debug!("run {run_id} has no workspace to finalize");
            return Ok(FinalizeReport {
                cleaned: true,
                summary: None,
                branch: None,
                error: None,
            });
        }

        let key = self.project_key_for(&path, project_id).await?;
        let _guard = self.locks.acquire(&key).await;

        let summary = self.git.log_oneline(&path, 10).await.ok();
        let outcome = self.push_from(&path, project_id).await?;

        if !outcome.pushed && outcome.has_remote {
            tracing::warn!(
                "push for run {run_id} failed; preserving worktree at {} for retry",
                path.display()
            );
            return Ok(FinalizeReport {
                cleaned: false,
                summary,
                branch: Some(outcome.branch),
                error: outcome.error,
            });
        }

        let repo = self.main_repo_of(&path, project_id).await?;
        self.git.worktree_remove(&repo, &path, true).await?;
        tracing::info!("finalized run {run_id}: pushed={}", outcome.pushed);
        Ok(FinalizeReport {
            cleaned: true,
            summary,
            branch: Some(outcome.branch),
            error: outcome.error,
        })
    }

    /// Merge each source branch into `target` sequentially, recording
    /// conflicts without blocking the remaining sources. Holds the project
    /// lock; the integration worktree is removed on every path.
    pub async fn merge_branches(
        &self,
        project_id: &str,
        target: &str,
        sources: &[String],
    ) -> Result<MergeReport> {
        let _guard = self.locks.acquire(project_id).await;
        let repo = self.project_path(project_id);
        if !repo.join(".git").exists() {
            return Err(WorkspaceError::Validation(format!(
                "project '{project_id}' has no repository to merge in"
            )));
        }

        tokio::fs::create_dir_all(&self.config.paths.worktrees_root).await?;
        let tmp = self
            .config
            .paths
            .worktrees_root
            .join(format!(".merge-{}", Uuid::new_v4()));

        if branch_exists_local(&repo, target)? {
            self.git.worktree_add(&repo, &tmp, target).await?;
        } else {
            self.git.worktree_add_new_branch(&repo, &tmp, target).await?;
        }

        let result = self.merge_into(&tmp, project_id, target, sources).await;

        if let Err(err) = self.git.worktree_remove(&repo, &tmp, true).await {
            tracing::warn!(
                "failed to remove integration worktree {}: {err}",
                tmp.display()
            );
            let _ = tokio::fs::remove_dir_all(&tmp).await;
            let _ = self.git.worktree_prune(&repo).await;
        }

        result
    }

    async fn merge_into(
        &self,
        tmp: &Path,
        project_id: &str,
        target: &str,
        sources: &[String],
    ) -> Result<MergeReport> {
        let mut merged = Vec::new();
        let mut conflicts = Vec::new();

        for source in sources {
            let merge = self
                .git
                .merge_no_edit(
                    tmp,
                    source,
                    &self.config.git.system_name,
                    &self.config.git.system_email,
                )
                .await;
            match merge {
                Ok(()) => merged.push(source.clone()),
                Err(err) => {
                    if let Err(abort_err) = self.git.merge_abort(tmp).await {
                        tracing::debug!("merge abort after '{source}': {abort_err}");
                    }
                    tracing::warn!("merge of '{source}' into '{target}' failed: {err}");
                    conflicts.push(MergeConflict {
                        branch: source.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        let mut pushed = false;
        if !merged.is_empty() {
            let outcome = self.push_from(tmp, Some(project_id)).await?;
            pushed = outcome.pushed;
            if let Some(err) = outcome.error {
                tracing::warn!("failed to push merge target '{target}': {err}");
            }
        }

        Ok(MergeReport {
            target: target.to_string(),
            success: conflicts.is_empty(),
            merged,
            conflicts,
            pushed,
        })
    }

    /// A worktree's `.git` marker must be a file pointing at the parent
    /// repository. A directory there means a nested repository was created
    /// inside the worktree, which is corruption we never auto-heal.
    async fn validate_existing_worktree(&self, path: &Path, expected_branch: &str) -> Result<()> {
        let marker = path.join(".git");
        if marker.is_dir() {
            return Err(WorkspaceError::CorruptedWorktree {
                path: path.to_path_buf(),
                reason: ".git marker is a directory, meaning a nested repository was created \
                         inside the worktree"
                    .to_string(),
            });
        }
        if !marker.is_file() {
            return Err(WorkspaceError::UnrecoverableState {
                path: path.to_path_buf(),
                reason: "directory exists but carries no .git marker".to_string(),
            });
        }

        let current = self.git.current_branch(path).await.map_err(|err| {
            WorkspaceError::UnrecoverableState {
                path: path.to_path_buf(),
                reason: format!("cannot resolve checked-out branch: {err}"),
            }
        })?;
        if current != expected_branch {
            return Err(WorkspaceError::UnrecoverableState {
                path: path.to_path_buf(),
                reason: format!("checked out on '{current}', expected '{expected_branch}'"),
            });
        }
        Ok(())
    }

    async fn clear_stale_lock_files(&self, repo: &Path, worktree: &Path) {
        let mut locks = vec![repo.join(".git").join("index.lock")];
        if let Ok(git_dir) = self.git.git_dir(worktree).await {
            locks.push(PathBuf::from(git_dir).join("index.lock"));
        }
        for lock in locks {
            if lock.exists() {
                tracing::warn!("removing stale git lock file {}", lock.display());
                let _ = tokio::fs::remove_file(&lock).await;
            }
        }
    }

    /// Lock key for the project owning `worktree`. Repositories live at
    /// `projects_root/{project_id}`, so the repository directory name is
    /// the project id when the caller did not pass one.
    async fn project_key_for(&self, worktree: &Path, project_id: Option<&str>) -> Result<String> {
        if let Some(project_id) = project_id {
            return Ok(project_id.to_string());
        }
        let repo = self.main_repo_of(worktree, None).await?;
        repo.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| WorkspaceError::UnrecoverableState {
                path: worktree.to_path_buf(),
                reason: "cannot derive owning project from repository path".to_string(),
            })
    }

    async fn main_repo_of(&self, worktree: &Path, project_id: Option<&str>) -> Result<PathBuf> {
        if let Some(project_id) = project_id {
            let repo = self.project_path(project_id);
            if repo.join(".git").exists() {
                return Ok(repo);
            }
        }
        let common_dir = self.git.git_common_dir(worktree).await?;
        let common_dir = PathBuf::from(common_dir);
        common_dir
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| WorkspaceError::UnrecoverableState {
                path: worktree.to_path_buf(),
                reason: "cannot locate parent repository".to_string(),
            })
    }
}

fn with_credential(url: &str, credential: Option<&GitCredential>) -> String {
    credential
        .and_then(|c| authenticated_url(url, &c.token))
        .unwrap_or_else(|| url.to_string())
}

fn branch_exists_local(repo: &Path, branch: &str) -> Result<bool> {
    let repo = git2::Repository::open(repo)?;
    let exists = repo.find_branch(branch, git2::BranchType::Local).is_ok();
    Ok(exists)
}

fn branch_exists_remote(repo: &Path, branch: &str) -> Result<bool> {
    let repo = git2::Repository::open(repo)?;
    let exists = repo
        .find_branch(&format!("origin/{branch}"), git2::BranchType::Remote)
        .is_ok();
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_branch_naming() {
        assert_eq!(run_branch("r1"), "run/r1");
    }

    #[test]
    fn test_task_branch_without_slug() {
        assert_eq!(task_branch("t42", None), "feat/t42");
        assert_eq!(task_branch("t42", Some("!!!")), "feat/t42");
    }

    #[test]
    fn test_task_branch_with_slug() {
        assert_eq!(
            task_branch("t42", Some("Fix the Login Flow")),
            "feat/t42-fix-the-login-flow"
        );
    }

    #[test]
    fn test_slugify_collapses_punctuation() {
        assert_eq!(slugify("a  b--c"), "a-b-c");
        assert_eq!(slugify("--lead"), "lead");
    }

    #[test]
    fn test_slugify_truncates() {
        let long = "x".repeat(100);
        assert_eq!(slugify(&long).len(), 40);
    }

    fn test_provisioner(root: &tempfile::TempDir) -> Arc<WorkspaceProvisioner> {
        let mut config = ProvisionerConfig::default();
        config.paths.projects_root = root.path().join("projects");
        config.paths.worktrees_root = root.path().join("worktrees");
        config.paths.sandboxes_root = root.path().join("sandboxes");
        Arc::new(WorkspaceProvisioner::new(
            Arc::new(config),
            Arc::new(crate::credentials::NoTokenClient),
        ))
    }

    #[tokio::test]
    async fn test_finalize_queues_behind_project_lock() {
        let root = tempfile::TempDir::new().unwrap();
        let provisioner = test_provisioner(&root);
        provisioner
            .create_run_workspace("p1", "r1", None, None)
            .await
            .unwrap();

        let guard = provisioner.locks.acquire("p1").await;
        let finalize = {
            let provisioner = Arc::clone(&provisioner);
            tokio::spawn(async move { provisioner.finalize_run_workspace("r1", Some("p1")).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!finalize.is_finished(), "finalize ran while the lock was held");

        drop(guard);
        let report = finalize.await.unwrap().unwrap();
        assert!(report.cleaned);
    }

    #[tokio::test]
    async fn test_push_queues_behind_project_lock() {
        let root = tempfile::TempDir::new().unwrap();
        let provisioner = test_provisioner(&root);
        provisioner
            .create_run_workspace("p1", "r1", None, None)
            .await
            .unwrap();

        let guard = provisioner.locks.acquire("p1").await;
        let push = {
            let provisioner = Arc::clone(&provisioner);
            tokio::spawn(async move { provisioner.push_branch("r1", Some("p1")).await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!push.is_finished(), "push ran while the lock was held");

        drop(guard);
        let outcome = push.await.unwrap().unwrap();
        assert!(!outcome.has_remote);
    }
}
