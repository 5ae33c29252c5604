use std::path::PathBuf;

use thiserror::Error;

use super::git_cli::GitCliError;
use crate::credentials::TokenError;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(
        "worktree at {path} is corrupted: {reason}.\n\
         Refusing to touch it: it may hold unsaved agent work.\n\
         Inspect the directory, salvage what matters, then remove it manually."
    )]
    CorruptedWorktree { path: PathBuf, reason: String },

    #[error("workspace at {path} is in an unrecoverable state: {reason}")]
    UnrecoverableState { path: PathBuf, reason: String },

    #[error(
        "git authentication failed: {0}.\n\
         The repository token may have expired or the installation may lack\n\
         access to this repository. Refresh the token association and retry."
    )]
    AuthFailed(String),

    #[error("git network failure: {0}")]
    Network(String),

    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("git operation failed: {0}")]
    Git(String),

    #[error("token service error: {0}")]
    Token(#[from] TokenError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<GitCliError> for WorkspaceError {
    fn from(err: GitCliError) -> Self {
        match err {
            GitCliError::Auth(msg) => WorkspaceError::AuthFailed(msg),
            GitCliError::Network(msg) => WorkspaceError::Network(msg),
            GitCliError::NotFound(what) => WorkspaceError::BranchNotFound(what),
            GitCliError::Command(msg) => WorkspaceError::Git(msg),
            GitCliError::Io(err) => WorkspaceError::Io(err),
        }
    }
}

impl From<git2::Error> for WorkspaceError {
    fn from(err: git2::Error) -> Self {
        WorkspaceError::Git(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
