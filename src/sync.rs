//! Sync Engine - Orchestrates one backup pass
//!
//! Lock, pre-flight, pull, back up every enabled utility, commit, push and
//! record the timestamp. The lock is held by an RAII guard so it is released
//! on every exit path.

use crate::backup::{human_size, BackupEngine, BackupReport, UtilitySize};
use crate::config::Config;
use crate::error::{class_of, ErrorClass, SyncError};
use crate::git::{CommitOutcome, GitClient, PullOutcome, REMOTE};
use crate::health::HealthCheck;
use crate::lock::SyncLock;
use crate::notify::Notifier;
use crate::paths::AppPaths;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDateTime, TimeZone};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub verbose: bool,
    pub skip_preflight: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PullStatus {
    Pulled(PullOutcome),
    /// Pull failed; the backup continued from local state
    Failed(String),
    DryRun,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitStatus {
    Committed(String),
    NothingToCommit,
    /// `auto_commit` is off
    Disabled,
    DryRun,
}

/// Results from a complete sync operation
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub dry_run: bool,
    pub pull: PullStatus,
    pub reports: Vec<BackupReport>,
    pub sizes: Vec<UtilitySize>,
    /// Utilities that failed, with the reason
    pub failures: Vec<(String, String)>,
    pub commit: Option<CommitStatus>,
    pub push_error: Option<String>,
    /// Every mutating step, in order; identical between dry and real runs
    pub actions: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: Duration,
}

impl SyncSummary {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            pull: PullStatus::DryRun,
            reports: Vec::new(),
            sizes: Vec::new(),
            failures: Vec::new(),
            commit: None,
            push_error: None,
            actions: Vec::new(),
            warnings: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn total_size(&self) -> u64 {
        self.sizes.iter().map(|s| s.total).sum()
    }

    pub fn utilities_synced(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty() || self.push_error.is_some()
    }
}

/// The main sync engine
#[derive(Clone)]
pub struct SyncEngine {
    config: Config,
    paths: AppPaths,
    git: GitClient,
    notifier: Notifier,
}

impl SyncEngine {
    pub fn new(config: Config, paths: AppPaths) -> Self {
        let git = GitClient::new(paths.repo_dir.clone());
        let notifier = Notifier::from_config(&config.notifications);
        Self {
            config,
            paths,
            git,
            notifier,
        }
    }

    pub fn with_git(mut self, git: GitClient) -> Self {
        self.git = git;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn git(&self) -> &GitClient {
        &self.git
    }

    /// Run one sync pass under the lock
    pub async fn run(&self, options: SyncOptions) -> Result<SyncSummary> {
        let _lock = SyncLock::acquire(&self.paths.lock_file)?;
        let start_time = Instant::now();

        info!(
            "Starting sync{}",
            if options.dry_run { " (dry run)" } else { "" }
        );

        let result = self.run_locked(options).await;

        match &result {
            Ok(summary) if summary.has_errors() => {
                self.notifier
                    .notify(
                        "Mac Sync Wizard",
                        &format!("Sync finished with {} problems", summary.failures.len() + summary.push_error.iter().count()),
                        true,
                    )
                    .await;
            }
            Ok(summary) => {
                info!(
                    "Sync completed in {:.2}s: {} utilities backed up",
                    start_time.elapsed().as_secs_f64(),
                    summary.utilities_synced()
                );
                if !summary.dry_run {
                    self.notifier
                        .notify(
                            "Mac Sync Wizard",
                            &format!("Synced {} utilities", summary.utilities_synced()),
                            false,
                        )
                        .await;
                }
            }
            Err(e) => {
                self.notifier
                    .notify("Mac Sync Wizard", &format!("Sync failed: {}", e), true)
                    .await;
            }
        }

        result.map(|mut summary| {
            summary.duration = start_time.elapsed();
            summary
        })
    }

    fn announce(&self, summary: &mut SyncSummary, action: String) {
        if summary.dry_run {
            info!("[DRY RUN] Would {}", action);
        } else {
            debug!("{}", action);
        }
        summary.actions.push(action);
    }

    async fn run_locked(&self, options: SyncOptions) -> Result<SyncSummary> {
        let mut summary = SyncSummary::new(options.dry_run);

        if !self.config.is_repository_configured() {
            return Err(SyncError::NoRepository.into());
        }

        if options.skip_preflight {
            debug!("Skipping pre-flight checks");
        } else {
            let health = HealthCheck::run(&self.config, &self.paths).await;
            for warning in health.warnings() {
                warn!("{}", warning.message);
            }
            if !health.all_passed() {
                return Err(SyncError::PreflightFailed(Box::new(health)).into());
            }
        }

        if !self.git.is_repository() {
            return Err(SyncError::RepositoryNotInitialized(self.paths.repo_dir.clone()).into());
        }

        let branch = self.config.repository.branch.clone();
        let strategy = self.config.sync.pull_strategy;
        self.announce(
            &mut summary,
            format!("pull {}/{} ({})", REMOTE, branch, strategy.as_str()),
        );
        summary.pull = if options.dry_run {
            PullStatus::DryRun
        } else {
            match self.git.pull(&branch, strategy).await {
                Ok(outcome) => {
                    if outcome.stash_pop_failed {
                        summary.warnings.push(
                            SyncError::StashPopFailed {
                                repo: self.paths.repo_dir.clone(),
                            }
                            .to_string(),
                        );
                    }
                    PullStatus::Pulled(outcome)
                }
                Err(e) => {
                    warn!("Pull failed, backing up local state anyway: {:#}", e);
                    summary.warnings.push(pull_warning(&e));
                    PullStatus::Failed(e.to_string())
                }
            }
        };

        let enabled = self.config.enabled_utilities();
        if enabled.is_empty() {
            warn!("No utilities enabled for sync");
            summary.warnings.push("No utilities enabled for sync".to_string());
            return Ok(summary);
        }

        let engine = BackupEngine::new(self.paths.clone(), options.dry_run);
        for (name, utility) in &enabled {
            let size = engine.estimate_utility_size(name, utility);
            if options.verbose {
                info!("{}: {}", name, human_size(size.total));
                for (path, bytes) in &size.details {
                    debug!("  {}: {}", path, human_size(*bytes));
                }
            }
            summary.sizes.push(size);

            let report = engine.backup_utility(name, utility).await;
            summary.actions.extend(report.actions.iter().cloned());
            summary.warnings.extend(report.warnings.iter().cloned());
            if !report.succeeded() {
                summary
                    .failures
                    .push((name.to_string(), report.failures.join("; ")));
            }
            summary.reports.push(report);
        }

        if options.verbose {
            info!("Total size to sync: {}", human_size(summary.total_size()));
        }

        if self.config.sync.auto_commit {
            self.announce(&mut summary, format!("commit changes in {}", self.paths.repo_dir.display()));
            self.announce(&mut summary, format!("push to {}/{}", REMOTE, branch));

            if options.dry_run {
                summary.commit = Some(CommitStatus::DryRun);
            } else {
                let message = self.config.render_commit_message(&Local::now(), enabled.len());
                let outcome = self.git.commit_all(&message).await.context("Commit failed")?;
                summary.commit = Some(match outcome {
                    CommitOutcome::Committed => CommitStatus::Committed(message),
                    CommitOutcome::NothingToCommit => CommitStatus::NothingToCommit,
                });

                if let Err(e) = self.git.push(Some(&branch)).await {
                    warn!("{}", e);
                    summary.push_error = Some(e.to_string());
                }
            }
        } else {
            summary.commit = Some(CommitStatus::Disabled);
        }

        if !options.dry_run {
            write_last_sync(&self.paths, &Local::now())?;
        }

        Ok(summary)
    }
}

/// Advisory pull errors carry their own recovery instructions
fn pull_warning(err: &anyhow::Error) -> String {
    match class_of(err) {
        ErrorClass::Advisory => err.to_string(),
        _ => format!("Pull failed: {}", err),
    }
}

pub fn write_last_sync(paths: &AppPaths, when: &DateTime<Local>) -> Result<()> {
    if let Some(parent) = paths.last_sync_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&paths.last_sync_file, when.to_rfc3339())
        .with_context(|| format!("Failed to write {}", paths.last_sync_file.display()))
}

/// Time of the last completed sync, if one was recorded
pub fn last_sync(paths: &AppPaths) -> Option<DateTime<Local>> {
    let content = std::fs::read_to_string(&paths.last_sync_file).ok()?;
    parse_timestamp(content.trim())
}

fn parse_timestamp(text: &str) -> Option<DateTime<Local>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Local));
    }
    // Older versions wrote a local time without offset
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextSync {
    /// Frequency is 0, only `sync` runs
    ManualOnly,
    /// Never synced, the next scheduled run will do it
    Pending,
    Due(DateTime<Local>),
}

#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub last_sync: Option<DateTime<Local>>,
    pub next_sync: NextSync,
    pub repository: Option<String>,
    pub is_syncing: bool,
    pub enabled_utilities: Vec<String>,
    pub total_utilities: usize,
}

pub fn status(config: &Config, paths: &AppPaths) -> SyncStatus {
    let last = last_sync(paths);
    let frequency = config.sync.frequency_seconds;

    let next_sync = match (frequency, last) {
        (0, _) => NextSync::ManualOnly,
        (_, None) => NextSync::Pending,
        (secs, Some(last)) => {
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            match ChronoDuration::try_seconds(secs).and_then(|d| last.checked_add_signed(d)) {
                Some(due) => NextSync::Due(due),
                None => NextSync::Pending,
            }
        }
    };

    SyncStatus {
        last_sync: last,
        next_sync,
        repository: config
            .is_repository_configured()
            .then(|| config.repository.url.clone()),
        is_syncing: SyncLock::is_held(&paths.lock_file),
        enabled_utilities: config
            .enabled_utilities()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect(),
        total_utilities: config.utilities.len(),
    }
}
