//! Paddock - run environment provisioning for autonomous agents
//!
//! Provisions and tears down the two isolated resources one agent run
//! needs: a git-worktree workspace carved out of a shared project
//! repository, and an execution container bound to that run. Many runs
//! proceed concurrently against shared repositories and a shared container
//! runtime; per-project locking, idempotent create paths, and crash
//! detection keep them from corrupting each other's state across process
//! restarts and partial failures.

pub mod bus;
pub mod config;
pub mod containers;
pub mod credentials;
pub mod lock;
pub mod workspace;
