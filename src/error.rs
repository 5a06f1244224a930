//! Classified errors for sync, restore and repository operations

use std::path::PathBuf;
use thiserror::Error;

use crate::health::HealthCheck;

/// How a caller should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reported to the user, the operation keeps going
    Advisory,
    /// Stops the current command
    Fatal,
    /// Logged only, never affects the exit code
    SilentDegrade,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A sync is already in progress (lock file: {})", .0.display())]
    AlreadySyncing(PathBuf),

    /// Carries the full report so callers can print every check
    #[error("Pre-flight checks failed: {}", .0.failure_messages().join("; "))]
    PreflightFailed(Box<HealthCheck>),

    #[error("No repository configured. Run 'mac-sync-wizard setup' first")]
    NoRepository,

    #[error("Repository is not initialized at {}. Run 'mac-sync-wizard setup' first", .0.display())]
    RepositoryNotInitialized(PathBuf),

    #[error("Invalid repository URL '{0}': it must start with http://, https://, ssh://, git@ or file://")]
    InvalidRepositoryUrl(String),

    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Pull could not be completed automatically. Resolve manually: cd {} && git pull", .repo.display())]
    PullConflict { repo: PathBuf },

    #[error("Push failed: {0}")]
    PushFailed(String),

    #[error("Stashed changes could not be re-applied. Recover them with: cd {} && git stash pop", .repo.display())]
    StashPopFailed { repo: PathBuf },

    #[error("Unknown utility: {0}")]
    UnknownUtility(String),

    #[error("No backup found for {0}")]
    NoBackup(String),

    #[error("Source path does not exist: {}", .0.display())]
    MissingSource(PathBuf),
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::AlreadySyncing(_)
            | SyncError::PreflightFailed(_)
            | SyncError::NoRepository
            | SyncError::RepositoryNotInitialized(_)
            | SyncError::InvalidRepositoryUrl(_)
            | SyncError::UnknownUtility(_)
            | SyncError::Git { .. } => ErrorClass::Fatal,
            SyncError::PullConflict { .. }
            | SyncError::PushFailed(_)
            | SyncError::StashPopFailed { .. }
            | SyncError::NoBackup(_) => ErrorClass::Advisory,
            SyncError::MissingSource(_) => ErrorClass::SilentDegrade,
        }
    }

    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::PreflightFailed(_) => 3,
            SyncError::NoRepository | SyncError::RepositoryNotInitialized(_) => 4,
            SyncError::InvalidRepositoryUrl(_) => 5,
            SyncError::AlreadySyncing(_) => 6,
            _ => 1,
        }
    }
}

/// Class of the first [`SyncError`] in the chain; anything else is fatal
pub fn class_of(err: &anyhow::Error) -> ErrorClass {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SyncError>())
        .map(SyncError::class)
        .unwrap_or(ErrorClass::Fatal)
}

/// Exit code for any error returned from a command
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SyncError>())
        .map(SyncError::exit_code)
        .unwrap_or(1)
}
