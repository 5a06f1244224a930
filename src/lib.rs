//! Mac Sync Wizard - Configuration backup for macOS utilities
//!
//! Backs up the settings of a fixed set of named utilities (editors, shell
//! configuration, fonts, trackpad preferences, ...) into a git repository and
//! restores them on another machine.
//!
//! ## Core Features
//!
//! - **Repository Management**: Initialize or connect the local working tree, resolve the branch,
//!   pull with stash and rebase-to-merge fallback
//! - **Backup/Restore**: Mirror configured paths into `backups/<utility>/` with exclude patterns,
//!   restore with a safety snapshot of everything overwritten
//! - **Sync Orchestration**: Lock, pre-flight checks, pull, backup, commit and push
//! - **Scheduling**: LaunchAgent registration and a foreground daemon loop
//!
//! ## Modules
//!
//! - [`config`]: Configuration store with deep-merge onto built-in defaults
//! - [`git`]: Repository manager over an injectable git executor
//! - [`backup`]: Backup/restore engine
//! - [`sync`]: Sync orchestrator and status

pub mod agent;
pub mod backup;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fonts;
pub mod git;
pub mod health;
pub mod lock;
pub mod notify;
pub mod paths;
pub mod repo_state;
pub mod shell;
pub mod sync;
pub mod ui;
pub mod wizard;

pub use backup::{BackupEngine, BackupReport, RestoreReport};
pub use config::{Config, UtilityConfig};
pub use daemon::Daemon;
pub use error::{ErrorClass, SyncError};
pub use git::{GitClient, GitExecutor, SystemGit};
pub use health::HealthCheck;
pub use lock::SyncLock;
pub use paths::AppPaths;
pub use sync::{SyncEngine, SyncOptions, SyncSummary};
