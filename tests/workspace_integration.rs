//! Integration tests for workspace provisioning against real git
//! repositories. Remotes are local bare repositories, so pushes exercise
//! the real code paths without the network.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tempfile::TempDir;

use paddock::config::ProvisionerConfig;
use paddock::credentials::NoTokenClient;
use paddock::workspace::error::WorkspaceError;
use paddock::workspace::WorkspaceProvisioner;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
        ])
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn git_out(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("failed to run git");
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn provisioner(root: &TempDir) -> WorkspaceProvisioner {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let mut config = ProvisionerConfig::default();
    config.paths.projects_root = root.path().join("projects");
    config.paths.worktrees_root = root.path().join("worktrees");
    config.paths.sandboxes_root = root.path().join("sandboxes");
    WorkspaceProvisioner::new(Arc::new(config), Arc::new(NoTokenClient))
}

/// Seeded bare repository usable as a clone/push remote.
fn make_bare_remote(root: &Path) -> PathBuf {
    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-b", "main"]);
    std::fs::write(seed.join("README.md"), "seed\n").unwrap();
    git(&seed, &["add", "-A"]);
    git(&seed, &["commit", "-m", "Initial commit"]);

    let bare = root.join("remote.git");
    let output = Command::new("git")
        .arg("-C")
        .arg(root)
        .args(["clone", "--bare", "seed", "remote.git"])
        .output()
        .expect("failed to run git");
    assert!(output.status.success());
    bare
}

#[tokio::test]
async fn test_repository_less_run_gets_empty_init_and_worktree() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let workspace = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();

    assert_eq!(workspace.branch, "run/r1");
    assert!(workspace.path.exists());
    assert!(workspace.path.join(".git").is_file());

    // The backing repository holds exactly the single empty system commit.
    let repo = provisioner.project_path("p1");
    let log = git_out(&repo, &["log", "--oneline"]);
    assert_eq!(log.lines().count(), 1);
    assert_eq!(git_out(&workspace.path, &["status", "--porcelain"]), "");
}

#[tokio::test]
async fn test_create_run_workspace_is_idempotent() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let first = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();
    let second = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_directory_git_marker_is_corruption_and_left_untouched() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let workspace = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();

    // Simulate a nested repository created inside the worktree.
    let marker = workspace.path.join(".git");
    std::fs::remove_file(&marker).unwrap();
    std::fs::create_dir(&marker).unwrap();
    std::fs::write(marker.join("evidence"), "unsaved work").unwrap();

    let err = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::CorruptedWorktree { .. }));

    // Nothing was deleted.
    assert!(marker.is_dir());
    assert!(marker.join("evidence").exists());
}

#[tokio::test]
async fn test_orphaned_run_branch_is_recreated_fresh() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let workspace = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();
    std::fs::write(workspace.path.join("leftover.txt"), "from crashed run").unwrap();
    provisioner
        .commit_step(&workspace.path, "s1", "agent-1", "leftover work")
        .await
        .unwrap();

    // Crash: the worktree directory disappears but the branch remains.
    std::fs::remove_dir_all(&workspace.path).unwrap();

    let recreated = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();
    assert_eq!(recreated.branch, "run/r1");
    assert!(recreated.path.exists());
    // The branch was recreated from the default branch, not resumed.
    assert!(!recreated.path.join("leftover.txt").exists());
}

#[tokio::test]
async fn test_commit_step_noops_on_clean_tree() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let workspace = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();

    let clean = provisioner
        .commit_step(&workspace.path, "s1", "agent-1", "nothing yet")
        .await
        .unwrap();
    assert_eq!(clean, None);

    std::fs::write(workspace.path.join("work.txt"), "output\n").unwrap();
    let commit = provisioner
        .commit_step(&workspace.path, "s2", "agent-1", "produced output")
        .await
        .unwrap()
        .expect("dirty tree must commit");
    assert_eq!(commit.len(), 40);

    let message = git_out(&workspace.path, &["log", "-1", "--format=%B"]);
    assert!(message.contains("produced output"));
    assert!(message.contains("Step: s2"));
    let author = git_out(&workspace.path, &["log", "-1", "--format=%an"]);
    assert_eq!(author, "agent-1");

    let again = provisioner
        .commit_step(&workspace.path, "s3", "agent-1", "no changes")
        .await
        .unwrap();
    assert_eq!(again, None);
}

#[tokio::test]
async fn test_finalize_pushes_and_cleans_up() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);
    let remote = make_bare_remote(root.path());
    let remote_url = remote.to_str().unwrap().to_string();

    let workspace = provisioner
        .create_run_workspace("p1", "r1", Some(&remote_url), None)
        .await
        .unwrap();
    std::fs::write(workspace.path.join("result.txt"), "done\n").unwrap();
    provisioner
        .commit_step(&workspace.path, "s1", "agent-1", "final result")
        .await
        .unwrap();

    let report = provisioner
        .finalize_run_workspace("r1", Some("p1"))
        .await
        .unwrap();
    assert!(report.cleaned);
    assert!(report.error.is_none());
    assert!(!workspace.path.exists());

    // The run branch made it to the remote.
    let branches = git_out(&remote, &["branch", "--list", "run/r1"]);
    assert!(branches.contains("run/r1"));
}

#[tokio::test]
async fn test_finalize_preserves_worktree_when_push_fails() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);
    let remote = make_bare_remote(root.path());
    let remote_url = remote.to_str().unwrap().to_string();

    let workspace = provisioner
        .create_run_workspace("p1", "r1", Some(&remote_url), None)
        .await
        .unwrap();
    std::fs::write(workspace.path.join("result.txt"), "done\n").unwrap();
    provisioner
        .commit_step(&workspace.path, "s1", "agent-1", "final result")
        .await
        .unwrap();

    // Break the remote so the push fails while a remote is still
    // configured: the worktree must survive for a retry.
    let repo = provisioner.project_path("p1");
    let broken = root.path().join("gone.git");
    git(&repo, &["remote", "set-url", "origin", broken.to_str().unwrap()]);

    let report = provisioner
        .finalize_run_workspace("r1", Some("p1"))
        .await
        .unwrap();
    assert!(!report.cleaned);
    assert!(report.error.is_some());
    assert!(workspace.path.exists());
}

#[tokio::test]
async fn test_finalize_without_remote_still_cleans() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let workspace = provisioner
        .create_run_workspace("p1", "r1", None, None)
        .await
        .unwrap();
    std::fs::write(workspace.path.join("result.txt"), "done\n").unwrap();
    provisioner
        .commit_step(&workspace.path, "s1", "agent-1", "final result")
        .await
        .unwrap();

    // No project id passed: the owning project is derived from the
    // worktree's parent repository.
    let report = provisioner
        .finalize_run_workspace("r1", None)
        .await
        .unwrap();
    // No remote to push to is not a failure; the workspace is disposable.
    assert!(report.cleaned);
    assert!(report.error.is_none());
    assert!(!workspace.path.exists());
}

#[tokio::test]
async fn test_task_branch_requires_remote() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let err = provisioner
        .create_run_workspace("p1", "r1", None, Some("feat/t1"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::Validation(_)));

    let err = provisioner
        .create_task_workspace("agent-1", "p1", "t1", "feat/t1")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::Validation(_)));
}

#[tokio::test]
async fn test_task_workspace_reuse_and_stale_lock_cleanup() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);
    let remote = make_bare_remote(root.path());
    let remote_url = remote.to_str().unwrap().to_string();

    provisioner
        .ensure_project_repository("p1", Some(&remote_url))
        .await
        .unwrap();

    let first = provisioner
        .create_task_workspace("agent-1", "p1", "t1", "feat/t1")
        .await
        .unwrap();
    assert!(!first.already_exists);
    assert_eq!(first.branch, "feat/t1");

    // A killed process leaves lock files in both gitdirs.
    let repo = provisioner.project_path("p1");
    let repo_lock = repo.join(".git").join("index.lock");
    std::fs::write(&repo_lock, "").unwrap();
    let worktree_gitdir = PathBuf::from(git_out(&first.path, &["rev-parse", "--absolute-git-dir"]));
    let worktree_lock = worktree_gitdir.join("index.lock");
    std::fs::write(&worktree_lock, "").unwrap();

    let second = provisioner
        .create_task_workspace("agent-1", "p1", "t1", "feat/t1")
        .await
        .unwrap();
    assert!(second.already_exists);
    assert_eq!(second.path, first.path);
    assert!(!repo_lock.exists());
    assert!(!worktree_lock.exists());
}

#[tokio::test]
async fn test_task_branch_continues_across_runs() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);
    let remote = make_bare_remote(root.path());
    let remote_url = remote.to_str().unwrap().to_string();

    let first = provisioner
        .create_run_workspace("p1", "r1", Some(&remote_url), Some("feat/t1"))
        .await
        .unwrap();
    std::fs::write(first.path.join("progress.txt"), "half done\n").unwrap();
    provisioner
        .commit_step(&first.path, "s1", "agent-1", "first half")
        .await
        .unwrap();
    let report = provisioner
        .finalize_run_workspace("r1", Some("p1"))
        .await
        .unwrap();
    assert!(report.cleaned);

    // A later run on the same task branch picks up where the first left
    // off instead of branching fresh.
    let second = provisioner
        .create_run_workspace("p1", "r2", None, Some("feat/t1"))
        .await
        .unwrap();
    assert_eq!(second.branch, "feat/t1");
    assert!(second.path.join("progress.txt").exists());
}

#[tokio::test]
async fn test_merge_branches_partial_success() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    provisioner
        .ensure_project_repository("p1", None)
        .await
        .unwrap();
    let repo = provisioner.project_path("p1");

    // Base content everyone branches from.
    std::fs::write(repo.join("shared.txt"), "base\n").unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-m", "base"]);

    for (branch, content, extra) in [
        ("feat/t1-a", "from-a\n", "a.txt"),
        ("feat/t1-b", "from-b\n", "b.txt"),
        ("feat/t1-c", "base\n", "c.txt"),
    ] {
        git(&repo, &["checkout", "-b", branch, "main"]);
        std::fs::write(repo.join("shared.txt"), content).unwrap();
        std::fs::write(repo.join(extra), "x\n").unwrap();
        git(&repo, &["add", "-A"]);
        git(&repo, &["commit", "-m", branch]);
    }
    git(&repo, &["checkout", "main"]);

    let sources = vec![
        "feat/t1-a".to_string(),
        "feat/t1-b".to_string(),
        "feat/t1-c".to_string(),
    ];
    let report = provisioner
        .merge_branches("p1", "feat/t1", &sources)
        .await
        .unwrap();

    // b conflicts with a's change to shared.txt; a and c still land.
    assert!(!report.success);
    assert_eq!(report.merged, vec!["feat/t1-a", "feat/t1-c"]);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].branch, "feat/t1-b");

    // The throwaway integration worktree is gone in all cases.
    let leftovers: Vec<_> = std::fs::read_dir(root.path().join("worktrees"))
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().starts_with(".merge-"))
                .collect()
        })
        .unwrap_or_default();
    assert!(leftovers.is_empty());

    // The merge result is visible on the target branch.
    let files = git_out(&repo, &["ls-tree", "--name-only", "feat/t1"]);
    assert!(files.contains("a.txt"));
    assert!(files.contains("c.txt"));
    assert!(!files.contains("b.txt"));
}

#[tokio::test]
async fn test_concurrent_runs_on_one_project_both_succeed() {
    let root = TempDir::new().unwrap();
    let provisioner = Arc::new(provisioner(&root));

    let first = {
        let provisioner = Arc::clone(&provisioner);
        tokio::spawn(async move {
            provisioner
                .create_run_workspace("p1", "r1", None, None)
                .await
        })
    };
    let second = {
        let provisioner = Arc::clone(&provisioner);
        tokio::spawn(async move {
            provisioner
                .create_run_workspace("p1", "r2", None, None)
                .await
        })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_ne!(first.path, second.path);
    assert_eq!(first.branch, "run/r1");
    assert_eq!(second.branch, "run/r2");
}

#[tokio::test]
async fn test_ensure_project_repository_is_idempotent() {
    let root = TempDir::new().unwrap();
    let provisioner = provisioner(&root);

    let first = provisioner
        .ensure_project_repository("p1", None)
        .await
        .unwrap();
    let head = git_out(&first, &["rev-parse", "HEAD"]);

    let second = provisioner
        .ensure_project_repository("p1", None)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(git_out(&second, &["rev-parse", "HEAD"]), head);
}
