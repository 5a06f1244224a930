use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::config::PullStrategy;
use crate::error::SyncError;
use crate::repo_state::{output_mentions_conflict, RepoQuery};

pub const REMOTE: &str = "origin";
const STASH_MESSAGE: &str = "Auto-stash before pull";
const README: &str = "# Mac Sync Wizard Repository\n\nThis repository contains synchronized Mac utility settings.\n";
const LFS_FONT_PATTERNS: [&str; 5] = [
    "backups/fonts/*.ttf",
    "backups/fonts/*.otf",
    "backups/fonts/*.ttc",
    "backups/fonts/*.woff",
    "backups/fonts/*.woff2",
];

/// Captured result of one git invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Trimmed stderr, falling back to stdout when git reported nothing there
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs git subcommands inside a working tree
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitExecutor: Send + Sync {
    async fn run(&self, repo: &Path, args: Vec<String>) -> Result<GitOutput>;
}

/// Executes the `git` binary found on PATH
#[derive(Debug, Clone, Default)]
pub struct SystemGit {
    envs: Vec<(String, String)>,
}

impl SystemGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra environment for every invocation (e.g. commit identity)
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl GitExecutor for SystemGit {
    async fn run(&self, repo: &Path, args: Vec<String>) -> Result<GitOutput> {
        debug!("git {} (in {})", args.join(" "), repo.display());

        let output = AsyncCommand::new("git")
            .args(&args)
            .current_dir(repo)
            .env("GIT_TERMINAL_PROMPT", "0")
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .await
            .with_context(|| format!("Failed to execute git {}", args.join(" ")))?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// How `init_repository` ended up on the requested branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchResolution {
    /// HEAD was already on the branch
    AlreadyOn,
    /// Switched to an existing local branch
    SwitchedLocal,
    /// Created the branch from the remote one, with tracking
    TrackingRemote,
    /// Neither local nor remote branch existed
    CreatedNew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// True when the working tree was created by this call
    pub created: bool,
    pub resolution: BranchResolution,
    /// Whether the initial `push --set-upstream` succeeded (new repositories only)
    pub pushed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOutcome {
    pub stashed: bool,
    /// A rebase conflict was resolved by falling back to a merge pull
    pub fell_back_to_merge: bool,
    /// Stash could not be re-applied and is still on the stash list
    pub stash_pop_failed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

/// Accept http(s), scp-style ssh and local `file://` mirrors
pub fn validate_repo_url(url: &str) -> Result<(), SyncError> {
    let url = url.trim();
    let valid = ["http://", "https://", "ssh://", "git@", "file://"]
        .iter()
        .any(|prefix| url.starts_with(prefix) && url.len() > prefix.len());
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidRepositoryUrl(url.to_string()))
    }
}

/// Repository manager for the local sync working tree
#[derive(Clone)]
pub struct GitClient {
    executor: Arc<dyn GitExecutor>,
    repo_dir: PathBuf,
}

impl GitClient {
    /// Create a client that shells out to the system git
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self::with_executor(repo_dir, Arc::new(SystemGit::new()))
    }

    pub fn with_executor(repo_dir: impl Into<PathBuf>, executor: Arc<dyn GitExecutor>) -> Self {
        Self {
            executor,
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn query(&self) -> RepoQuery<'_> {
        RepoQuery::new(self.executor.as_ref(), &self.repo_dir)
    }

    pub fn is_repository(&self) -> bool {
        self.query().is_repository()
    }

    async fn git(&self, args: &[&str]) -> Result<GitOutput> {
        self.executor
            .run(&self.repo_dir, args.iter().map(|a| a.to_string()).collect())
            .await
    }

    /// Run git and turn a non-zero exit into [`SyncError::Git`]
    async fn git_checked(&self, args: &[&str]) -> Result<GitOutput> {
        let output = self.git(args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(SyncError::Git {
                command: args.join(" "),
                stderr: output.message(),
            }
            .into())
        }
    }

    /// Make the working tree exist, point `origin` at `url` and check out `branch`
    pub async fn init_repository(&self, url: &str, branch: &str) -> Result<InitReport> {
        validate_repo_url(url)?;
        info!("Initializing repository: {} ({})", url, branch);

        if self.is_repository() {
            let resolution = self.connect_existing(url, branch).await?;
            Ok(InitReport {
                created: false,
                resolution,
                pushed: false,
            })
        } else {
            self.create_new(url, branch).await
        }
    }

    async fn create_new(&self, url: &str, branch: &str) -> Result<InitReport> {
        tokio::fs::create_dir_all(&self.repo_dir)
            .await
            .context("Failed to create repository directory")?;

        self.git_checked(&["init"]).await?;

        // A leftover origin from a half-finished setup would make `remote add` fail
        let _ = self.git(&["remote", "remove", REMOTE]).await?;
        self.git_checked(&["remote", "add", REMOTE, url]).await?;

        let fetch = self.git(&["fetch", REMOTE]).await?;
        if !fetch.success {
            // Empty remotes have nothing to fetch
            warn!("Initial fetch failed: {}", fetch.message());
        }

        // Adopt an existing remote branch before anything is written or committed
        let mut adopted_remote = false;
        if fetch.success && self.query().remote_branch_exists(REMOTE, branch).await? {
            let remote_ref = format!("{}/{}", REMOTE, branch);
            self.git_checked(&["checkout", "-B", branch, "--track", &remote_ref])
                .await?;
            adopted_remote = true;
        }

        if which::which("git-lfs").is_ok() {
            if let Err(e) = self.setup_lfs_for_fonts().await {
                warn!("Git LFS setup failed, fonts will be stored as regular files: {:#}", e);
            }
        }

        self.create_skeleton().await?;

        self.git_checked(&["add", "-A"]).await?;
        if self.query().has_uncommitted_changes().await? {
            let commit = self.git(&["commit", "-m", "Initial commit"]).await?;
            if !commit.success {
                warn!("Initial commit failed: {}", commit.message());
            }
        }

        let resolution = if adopted_remote {
            BranchResolution::TrackingRemote
        } else {
            self.resolve_branch(branch).await?
        };

        let push = self.git(&["push", "--set-upstream", REMOTE, branch]).await?;
        if !push.success {
            warn!("Initial push failed (the remote may reject it until it has content): {}", push.message());
        }

        info!("Repository ready at {} on branch {}", self.repo_dir.display(), branch);
        Ok(InitReport {
            created: true,
            resolution,
            pushed: push.success,
        })
    }

    async fn connect_existing(&self, url: &str, branch: &str) -> Result<BranchResolution> {
        match self.query().remote_url(REMOTE).await? {
            Some(_) => self.git_checked(&["remote", "set-url", REMOTE, url]).await?,
            None => self.git_checked(&["remote", "add", REMOTE, url]).await?,
        };

        self.git_checked(&["fetch", "--all"]).await?;

        let resolution = self.resolve_branch(branch).await?;
        info!("Connected to repository: {} (branch: {})", url, branch);
        Ok(resolution)
    }

    async fn create_skeleton(&self) -> Result<()> {
        for dir in ["backups", "config", "logs"] {
            let path = self.repo_dir.join(dir);
            tokio::fs::create_dir_all(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let keep = path.join(".gitkeep");
            if !keep.exists() {
                tokio::fs::write(&keep, "").await?;
            }
        }

        let readme = self.repo_dir.join("README.md");
        if !readme.exists() {
            tokio::fs::write(&readme, README)
                .await
                .context("Failed to write README")?;
        }
        Ok(())
    }

    /// Check out `branch`: current, then local, then remote-tracking, then new
    async fn resolve_branch(&self, branch: &str) -> Result<BranchResolution> {
        let query = self.query();
        let current = query.current_branch().await?;
        let remote_exists = query.remote_branch_exists(REMOTE, branch).await?;
        let upstream = format!("--set-upstream-to={}/{}", REMOTE, branch);

        if current.as_deref() == Some(branch) {
            debug!("Already on branch {}", branch);
            if remote_exists {
                let _ = self.git(&["branch", &upstream, branch]).await?;
            }
            return Ok(BranchResolution::AlreadyOn);
        }

        if query.local_branch_exists(branch).await? {
            info!("Checking out existing local branch {}", branch);
            self.git_checked(&["checkout", branch]).await?;
            if remote_exists {
                let _ = self.git(&["branch", &upstream, branch]).await?;
            }
            return Ok(BranchResolution::SwitchedLocal);
        }

        if remote_exists {
            info!("Checking out remote branch {} with tracking", branch);
            let remote_ref = format!("{}/{}", REMOTE, branch);
            self.git_checked(&["checkout", "-b", branch, "--track", &remote_ref])
                .await?;
            return Ok(BranchResolution::TrackingRemote);
        }

        warn!("Branch {} not found locally or on {}, creating it", branch, REMOTE);
        self.git_checked(&["checkout", "-b", branch]).await?;
        Ok(BranchResolution::CreatedNew)
    }

    /// Pull `branch` from origin, stashing local changes around the pull.
    ///
    /// A rebase conflict is aborted and retried as a merge. When the merge
    /// fails too it is aborted and [`SyncError::PullConflict`] is returned, so
    /// the tree is never left mid-rebase or mid-merge.
    pub async fn pull(&self, branch: &str, strategy: PullStrategy) -> Result<PullOutcome> {
        if !self.is_repository() {
            return Err(SyncError::RepositoryNotInitialized(self.repo_dir.clone()).into());
        }

        let query = self.query();
        let mut outcome = PullOutcome::default();

        if query.has_uncommitted_changes().await? {
            info!("Stashing uncommitted changes before pull");
            let stash = self
                .git(&["stash", "push", "--include-untracked", "-m", STASH_MESSAGE])
                .await?;
            if stash.success {
                outcome.stashed = true;
            } else {
                warn!("Failed to stash local changes: {}", stash.message());
            }
        }

        let fetch = self.git(&["fetch", REMOTE]).await?;
        if !fetch.success {
            warn!("Fetch failed: {}", fetch.message());
        }

        let mode = match strategy {
            PullStrategy::Rebase => "--rebase",
            PullStrategy::Merge => "--no-rebase",
        };
        let pull = self.git(&["pull", mode, REMOTE, branch]).await?;

        if !pull.success {
            let conflicted = output_mentions_conflict(&pull) || query.rebase_in_progress();

            if strategy == PullStrategy::Rebase && conflicted {
                warn!("Rebase hit a conflict, aborting and retrying with a merge");
                let abort = self.git(&["rebase", "--abort"]).await?;
                if !abort.success {
                    warn!("git rebase --abort failed: {}", abort.message());
                }
                outcome.fell_back_to_merge = true;

                let retry = self.git(&["pull", "--no-rebase", REMOTE, branch]).await?;
                if !retry.success {
                    warn!("Merge pull failed as well: {}", retry.message());
                    self.abort_in_progress().await?;
                    self.restore_stash(outcome.stashed).await;
                    return Err(SyncError::PullConflict {
                        repo: self.repo_dir.clone(),
                    }
                    .into());
                }
            } else {
                self.abort_in_progress().await?;
                self.restore_stash(outcome.stashed).await;

                if conflicted {
                    return Err(SyncError::PullConflict {
                        repo: self.repo_dir.clone(),
                    }
                    .into());
                }
                return Err(SyncError::Git {
                    command: format!("pull {} {} {}", mode, REMOTE, branch),
                    stderr: pull.message(),
                }
                .into());
            }
        }

        if outcome.stashed {
            let pop = self.git(&["stash", "pop"]).await?;
            if !pop.success {
                let err = SyncError::StashPopFailed {
                    repo: self.repo_dir.clone(),
                };
                warn!("{}: {}", err, pop.message());
                outcome.stash_pop_failed = true;
            }
        }

        info!("Pulled latest changes for {}", branch);
        Ok(outcome)
    }

    async fn abort_in_progress(&self) -> Result<()> {
        let query = self.query();
        if query.rebase_in_progress() {
            let _ = self.git(&["rebase", "--abort"]).await?;
        }
        if query.merge_in_progress() {
            let _ = self.git(&["merge", "--abort"]).await?;
        }
        Ok(())
    }

    /// Put stashed changes back after a failed pull
    async fn restore_stash(&self, stashed: bool) {
        if !stashed {
            return;
        }
        match self.git(&["stash", "pop"]).await {
            Ok(pop) if pop.success => debug!("Restored stashed changes"),
            Ok(pop) => warn!(
                "{}: {}",
                SyncError::StashPopFailed {
                    repo: self.repo_dir.clone()
                },
                pop.message()
            ),
            Err(e) => warn!("Failed to run git stash pop: {:#}", e),
        }
    }

    /// Stage everything and commit; a clean tree is a successful no-op
    pub async fn commit_all(&self, message: &str) -> Result<CommitOutcome> {
        self.git_checked(&["add", "-A"]).await?;

        if !self.query().has_uncommitted_changes().await? {
            info!("No changes to commit");
            return Ok(CommitOutcome::NothingToCommit);
        }

        self.git_checked(&["commit", "-m", message]).await?;
        info!("Committed changes: {}", message);
        Ok(CommitOutcome::Committed)
    }

    /// Push `branch`, or the current branch when none is given
    pub async fn push(&self, branch: Option<&str>) -> Result<()> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => self
                .query()
                .current_branch()
                .await?
                .unwrap_or_else(|| "main".to_string()),
        };

        let output = self.git(&["push", REMOTE, &branch]).await?;
        if !output.success {
            return Err(SyncError::PushFailed(output.message()).into());
        }

        info!("Pushed {} to {}", branch, REMOTE);
        Ok(())
    }

    /// Store font files through Git LFS
    pub async fn setup_lfs_for_fonts(&self) -> Result<()> {
        self.git_checked(&["lfs", "install", "--local"]).await?;
        for pattern in LFS_FONT_PATTERNS {
            self.git_checked(&["lfs", "track", pattern]).await?;
        }
        info!("Git LFS tracking enabled for font files");
        Ok(())
    }
}
