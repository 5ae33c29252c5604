//! Thin adapter over the `git` CLI.
//!
//! Working-tree mutations go through the CLI (it refuses to clobber
//! uncommitted work, which libgit2 does not enforce by default); read-only
//! graph queries stay on `git2` in the provisioner. The adapter's other job
//! is normalizing raw stderr into a closed set of error kinds so callers
//! match on kind, never on message text.

use std::ffi::OsStr;
use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("git command failed: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GitCliError>;

const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "permission denied (publickey",
    "invalid username or",
    "returned error: 401",
    "returned error: 403",
    "access denied",
];

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "connection refused",
    "connection timed out",
    "network is unreachable",
    "operation timed out",
    "the remote end hung up unexpectedly",
    "early eof",
    "unable to access",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "couldn't find remote ref",
    "did not match any",
    "unknown revision",
    "no such ref",
    "not a valid ref",
];

/// Map raw git stderr to an error kind. Auth markers win over network ones:
/// an HTTP 403 surfaces underneath git's generic "unable to access" line.
pub(crate) fn classify_stderr(stderr: &str) -> GitCliError {
    let lowered = stderr.to_lowercase();
    if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        GitCliError::Auth(stderr.trim().to_string())
    } else if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        GitCliError::Network(stderr.trim().to_string())
    } else if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        GitCliError::NotFound(stderr.trim().to_string())
    } else {
        GitCliError::Command(stderr.trim().to_string())
    }
}

#[derive(Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn git<I, S>(&self, dir: &Path, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::debug!("git failed in {}: {}", dir.display(), stderr.trim());
            Err(classify_stderr(&stderr))
        }
    }

    pub async fn clone(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let dest_name = dest
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| GitCliError::Command(format!("invalid clone path {}", dest.display())))?;
        self.git(parent, ["clone", url, dest_name]).await?;
        Ok(())
    }

    pub async fn init(&self, dest: &Path, initial_branch: &str) -> Result<()> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let dest_name = dest
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| GitCliError::Command(format!("invalid init path {}", dest.display())))?;
        self.git(parent, ["init", "-b", initial_branch, dest_name])
            .await?;
        Ok(())
    }

    pub async fn commit_allow_empty(
        &self,
        dir: &Path,
        message: &str,
        name: &str,
        email: &str,
    ) -> Result<()> {
        self.git(
            dir,
            [
                "-c".to_string(),
                format!("user.name={name}"),
                "-c".to_string(),
                format!("user.email={email}"),
                "commit".to_string(),
                "--allow-empty".to_string(),
                "-m".to_string(),
                message.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn add_all(&self, dir: &Path) -> Result<()> {
        self.git(dir, ["add", "-A"]).await?;
        Ok(())
    }

    /// Commit staged changes as `author` with the given committer identity.
    pub async fn commit(
        &self,
        dir: &Path,
        message: &str,
        author: &str,
        committer_name: &str,
        committer_email: &str,
    ) -> Result<()> {
        self.git(
            dir,
            [
                "-c".to_string(),
                format!("user.name={committer_name}"),
                "-c".to_string(),
                format!("user.email={committer_email}"),
                "commit".to_string(),
                "-m".to_string(),
                message.to_string(),
                "--author".to_string(),
                author.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn status_porcelain(&self, dir: &Path) -> Result<String> {
        self.git(dir, ["status", "--porcelain"]).await
    }

    pub async fn rev_parse_head(&self, dir: &Path) -> Result<String> {
        self.git(dir, ["rev-parse", "HEAD"]).await
    }

    pub async fn current_branch(&self, dir: &Path) -> Result<String> {
        self.git(dir, ["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn log_oneline(&self, dir: &Path, limit: usize) -> Result<String> {
        self.git(dir, ["log", "--oneline", "-n", &limit.to_string()])
            .await
    }

    /// `git worktree add <path> <branch>` for an existing branch.
    pub async fn worktree_add(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        self.git(
            repo,
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                path.as_os_str(),
                OsStr::new(branch),
            ],
        )
        .await?;
        Ok(())
    }

    /// `git worktree add -b <branch> <path>`, creating the branch from HEAD.
    pub async fn worktree_add_new_branch(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
    ) -> Result<()> {
        self.git(
            repo,
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                OsStr::new("-b"),
                OsStr::new(branch),
                path.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Create a local branch tracking `origin/<branch>` in a new worktree.
    pub async fn worktree_add_tracking(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
    ) -> Result<()> {
        let remote_ref = format!("origin/{branch}");
        self.git(
            repo,
            [
                OsStr::new("worktree"),
                OsStr::new("add"),
                OsStr::new("--track"),
                OsStr::new("-b"),
                OsStr::new(branch),
                path.as_os_str(),
                OsStr::new(&remote_ref),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn worktree_remove(&self, repo: &Path, path: &Path, force: bool) -> Result<()> {
        let mut args = vec![OsStr::new("worktree"), OsStr::new("remove")];
        if force {
            args.push(OsStr::new("--force"));
        }
        args.push(path.as_os_str());
        self.git(repo, args).await?;
        Ok(())
    }

    pub async fn worktree_prune(&self, repo: &Path) -> Result<()> {
        self.git(repo, ["worktree", "prune"]).await?;
        Ok(())
    }

    pub async fn branch_delete(&self, repo: &Path, branch: &str) -> Result<()> {
        self.git(repo, ["branch", "-D", branch]).await?;
        Ok(())
    }

    /// Fetch all branches from an explicit URL into `origin/*` tracking
    /// refs. Passing the URL directly keeps credentialed URLs out of the
    /// repository configuration entirely.
    pub async fn fetch_prune_from(&self, repo: &Path, url: &str) -> Result<()> {
        self.git(
            repo,
            [
                "fetch",
                "--prune",
                url,
                "+refs/heads/*:refs/remotes/origin/*",
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn pull_ff_only(&self, dir: &Path) -> Result<()> {
        self.git(dir, ["pull", "--ff-only"]).await?;
        Ok(())
    }

    pub async fn push(&self, dir: &Path, branch: &str) -> Result<()> {
        self.git(dir, ["push", "-u", "origin", branch]).await?;
        Ok(())
    }

    /// Merge `branch` into the current branch. The committer identity is
    /// passed explicitly: a non-fast-forward merge creates a commit, and
    /// daemon hosts have no ambient `user.name`/`user.email`.
    pub async fn merge_no_edit(
        &self,
        dir: &Path,
        branch: &str,
        committer_name: &str,
        committer_email: &str,
    ) -> Result<()> {
        self.git(
            dir,
            [
                "-c".to_string(),
                format!("user.name={committer_name}"),
                "-c".to_string(),
                format!("user.email={committer_email}"),
                "merge".to_string(),
                "--no-edit".to_string(),
                branch.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    pub async fn merge_abort(&self, dir: &Path) -> Result<()> {
        self.git(dir, ["merge", "--abort"]).await?;
        Ok(())
    }

    /// `None` when no `origin` remote is configured.
    pub async fn remote_url(&self, dir: &Path) -> Result<Option<String>> {
        match self.git(dir, ["remote", "get-url", "origin"]).await {
            Ok(url) => Ok(Some(url)),
            Err(GitCliError::Command(msg)) if msg.to_lowercase().contains("no such remote") => {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn set_remote_url(&self, dir: &Path, url: &str) -> Result<()> {
        self.git(dir, ["remote", "set-url", "origin", url]).await?;
        Ok(())
    }

    /// Absolute path of the gitdir serving `dir` (for a worktree this is
    /// `<repo>/.git/worktrees/<name>`).
    pub async fn git_dir(&self, dir: &Path) -> Result<String> {
        self.git(dir, ["rev-parse", "--absolute-git-dir"]).await
    }

    /// Absolute path of the shared `.git` directory, even when `dir` is a
    /// linked worktree.
    pub async fn git_common_dir(&self, dir: &Path) -> Result<String> {
        self.git(
            dir,
            ["rev-parse", "--path-format=absolute", "--git-common-dir"],
        )
        .await
    }
}
