//! Backup and restore engine
//!
//! Mirrors each utility's source paths into `backups/<utility>/<basename>`
//! inside the repository working tree, and copies them back on restore after
//! taking a safety snapshot of whatever is about to be overwritten. Path
//! components matched by a glob in a parent directory are kept, so several
//! installed versions back up side by side.
//!
//! Every mutating step is described by an action string. A dry run records
//! the same actions as a real run and only logs them.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use filetime::FileTime;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{UtilityConfig, FONTS_UTILITY};
use crate::error::SyncError;
use crate::fonts;
use crate::paths::{has_glob_chars, AppPaths};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Outcome of backing up one utility
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupReport {
    pub utility: String,
    pub items_copied: usize,
    /// Configured sources that do not exist on this machine
    pub missing: Vec<PathBuf>,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
    pub actions: Vec<String>,
}

impl BackupReport {
    fn new(utility: &str) -> Self {
        Self {
            utility: utility.to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of restoring one utility
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestoreReport {
    pub utility: String,
    /// Snapshot directory under `restore_backups/`, `None` when nothing was overwritten
    pub safety_backup: Option<PathBuf>,
    pub items_restored: usize,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
    pub actions: Vec<String>,
}

impl RestoreReport {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UtilitySize {
    pub utility: String,
    pub total: u64,
    pub details: Vec<(String, u64)>,
}

#[derive(Debug, Clone)]
struct ExcludePattern {
    pattern: Pattern,
    dir_only: bool,
    has_separator: bool,
}

/// rsync-style exclude patterns evaluated against paths relative to a source root.
///
/// A pattern ending in `/` only matches directories. A pattern containing `/`
/// is matched against trailing runs of path components, otherwise against
/// the entry name alone.
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    raw: Vec<String>,
    patterns: Vec<ExcludePattern>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Self {
        let mut set = Self::default();
        for raw in patterns {
            let trimmed = raw.trim();
            let dir_only = trimmed.ends_with('/');
            let body = trimmed.trim_end_matches('/').trim_start_matches('/');
            if body.is_empty() {
                continue;
            }
            match Pattern::new(body) {
                Ok(pattern) => {
                    set.raw.push(trimmed.to_string());
                    set.patterns.push(ExcludePattern {
                        pattern,
                        dir_only,
                        has_separator: body.contains('/'),
                    });
                }
                Err(e) => warn!("Ignoring invalid exclude pattern '{}': {}", raw, e),
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn raw_patterns(&self) -> &[String] {
        &self.raw
    }

    pub fn is_excluded(&self, relative: &Path, is_dir: bool) -> bool {
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        let Some(name) = components.last() else {
            return false;
        };

        self.patterns.iter().any(|p| {
            if p.dir_only && !is_dir {
                return false;
            }
            if p.has_separator {
                (0..components.len()).any(|start| {
                    let tail = components[start..].join("/");
                    p.pattern.matches_with(&tail, MATCH_OPTIONS)
                })
            } else {
                p.pattern.matches_with(name, MATCH_OPTIONS)
            }
        })
    }
}

/// Copy a file, keeping permissions and timestamps
pub fn copy_file_preserving(src: &Path, dest: &Path) -> Result<()> {
    std::fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    let meta = std::fs::metadata(src)?;
    filetime::set_file_times(
        dest,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .with_context(|| format!("Failed to set timestamps on {}", dest.display()))?;
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let target = std::fs::read_link(src)?;
    std::os::unix::fs::symlink(&target, dest)
        .with_context(|| format!("Failed to create symlink {}", dest.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    copy_file_preserving(src, dest)
}

/// Recursively copy `src` into `dest`, skipping excluded entries.
///
/// Symlinks are recreated rather than followed.
pub fn copy_dir_filtered(src: &Path, dest: &Path, excludes: &ExcludeSet) -> Result<usize> {
    let mut copied = 0;
    let walker = WalkDir::new(src).follow_links(false).into_iter().filter_entry(|entry| {
        match entry.path().strip_prefix(src) {
            Ok(rel) if rel.as_os_str().is_empty() => true,
            Ok(rel) => !excludes.is_excluded(rel, entry.file_type().is_dir()),
            Err(_) => true,
        }
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src)?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            copy_file_preserving(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}

fn remove_path(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))
}

/// Copy a file, directory or symlink to `dest`, replacing whatever is there
fn replace_with_copy(src: &Path, dest: &Path) -> Result<usize> {
    remove_path(dest)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let meta = std::fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        copy_symlink(src, dest)?;
        Ok(1)
    } else if meta.is_dir() {
        copy_dir_filtered(src, dest, &ExcludeSet::default())
    } else {
        copy_file_preserving(src, dest)?;
        Ok(1)
    }
}

fn exists_no_follow(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Location of `source` under a utility's backup directory.
///
/// Components matched by a glob in a parent directory are kept, so
/// `JetBrains/PyCharm*/options` backs up to `PyCharm2024.1/options`.
fn backup_relative_path(pattern: &Path, source: &Path) -> Option<PathBuf> {
    let leaf = source.file_name()?;
    let pattern_parts: Vec<Component> = pattern.components().collect();
    let source_parts: Vec<Component> = source.components().collect();

    let mut rel = PathBuf::new();
    if pattern_parts.len() == source_parts.len() {
        let parents = pattern_parts.len().saturating_sub(1);
        for (p, s) in pattern_parts.iter().zip(&source_parts).take(parents) {
            if has_glob_chars(&p.as_os_str().to_string_lossy()) {
                rel.push(s.as_os_str());
            }
        }
    }
    rel.push(leaf);
    Some(rel)
}

/// Sorted names in `dir` matching `pattern`, empty when `dir` is missing
fn matching_entries(dir: &Path, pattern: &Pattern, dirs_only: bool) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| !dirs_only || entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|n| pattern.matches_with(n, MATCH_OPTIONS))
        .collect();
    names.sort();
    names
}

/// Total size in bytes of a file or directory tree, symlinks not followed
pub fn path_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Format a byte count as `512 B`, `1.5 KB`, `2.0 GB`
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

pub struct BackupEngine {
    paths: AppPaths,
    dry_run: bool,
    rsync: Option<PathBuf>,
}

impl BackupEngine {
    pub fn new(paths: AppPaths, dry_run: bool) -> Self {
        Self {
            paths,
            dry_run,
            rsync: which::which("rsync").ok(),
        }
    }

    /// Override rsync discovery; `None` forces the built-in copy
    pub fn with_rsync(mut self, rsync: Option<PathBuf>) -> Self {
        self.rsync = rsync;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    fn announce(&self, actions: &mut Vec<String>, action: String) {
        if self.dry_run {
            info!("[DRY RUN] Would {}", action);
        } else {
            debug!("{}", action);
        }
        actions.push(action);
    }

    /// Back up one utility into `backups/<name>/`
    pub async fn backup_utility(&self, name: &str, utility: &UtilityConfig) -> BackupReport {
        if name == FONTS_UTILITY {
            return self.backup_fonts(name, utility);
        }

        let mut report = BackupReport::new(name);
        let dest_root = self.paths.utility_backup_dir(name);
        let excludes = ExcludeSet::new(&utility.exclude_patterns);

        for raw in &utility.paths {
            let expanded = self.paths.expand(raw);
            let pattern = PathBuf::from(expanded.to_string_lossy().trim_end_matches('/'));
            let sources = self.paths.expand_existing(raw);
            if sources.is_empty() {
                let missing = self.paths.expand(raw);
                let message = SyncError::MissingSource(missing.clone()).to_string();
                warn!("{}: {}", name, message);
                report.warnings.push(message);
                report.missing.push(missing);
                continue;
            }

            for source in sources {
                let Some(rel) = backup_relative_path(&pattern, &source) else {
                    report.failures.push(format!("{}: no file name", source.display()));
                    continue;
                };
                let dest = dest_root.join(&rel);

                match self.backup_path(&source, &dest, &excludes, &mut report.actions).await {
                    Ok(()) => report.items_copied += 1,
                    Err(e) => {
                        warn!("Failed to back up {}: {:#}", source.display(), e);
                        report.failures.push(format!("{}: {:#}", source.display(), e));
                    }
                }
            }
        }

        if report.succeeded() {
            info!("Backed up {} ({} items)", name, report.items_copied);
        }
        report
    }

    async fn backup_path(
        &self,
        source: &Path,
        dest: &Path,
        excludes: &ExcludeSet,
        actions: &mut Vec<String>,
    ) -> Result<()> {
        if source.is_dir() {
            if let Some(rsync) = self.rsync.as_ref().filter(|_| !excludes.is_empty()) {
                self.announce(
                    actions,
                    format!(
                        "mirror {} -> {} with rsync (excluding {})",
                        source.display(),
                        dest.display(),
                        excludes.raw_patterns().join(", ")
                    ),
                );
                if self.dry_run {
                    return Ok(());
                }
                std::fs::create_dir_all(dest)?;
                return run_rsync(rsync, source, dest, excludes).await;
            }

            self.announce(actions, format!("replace {} with a copy of {}", dest.display(), source.display()));
            if self.dry_run {
                return Ok(());
            }
            remove_path(dest)?;
            std::fs::create_dir_all(dest)?;
            copy_dir_filtered(source, dest, excludes)?;
            return Ok(());
        }

        self.announce(actions, format!("copy {} -> {}", source.display(), dest.display()));
        if self.dry_run {
            return Ok(());
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        remove_path(dest)?;
        copy_file_preserving(source, dest)
    }

    fn font_source_dir(&self, utility: &UtilityConfig) -> PathBuf {
        utility
            .paths
            .first()
            .map(|raw| self.paths.expand(raw.trim_end_matches('/')))
            .unwrap_or_else(|| self.paths.fonts_dir())
    }

    /// Font files to back up, chosen by family, include pattern, or everything not excluded
    pub fn select_fonts(&self, utility: &UtilityConfig) -> Result<(Vec<String>, Vec<String>)> {
        let dir = self.font_source_dir(utility);
        let mut warnings = Vec::new();
        let mut selected = BTreeSet::new();

        if !utility.custom_fonts.is_empty() {
            for family in &utility.custom_fonts {
                let files = fonts::font_files_for_family(&dir, family)?;
                if files.is_empty() {
                    let message = format!("No font files found for family '{}'", family);
                    warn!("{}", message);
                    warnings.push(message);
                }
                selected.extend(files);
            }
            return Ok((selected.into_iter().collect(), warnings));
        }

        let entries: Vec<String> = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {}", dir.display()))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();

        if !utility.include_patterns.is_empty() {
            let includes: Vec<Pattern> = utility
                .include_patterns
                .iter()
                .filter_map(|raw| match Pattern::new(raw) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        warn!("Ignoring invalid include pattern '{}': {}", raw, e);
                        None
                    }
                })
                .collect();
            selected.extend(
                entries
                    .into_iter()
                    .filter(|name| includes.iter().any(|p| p.matches_with(name, MATCH_OPTIONS))),
            );
        } else {
            let excludes = ExcludeSet::new(&utility.exclude_patterns);
            selected.extend(
                entries
                    .into_iter()
                    .filter(|name| !excludes.is_excluded(Path::new(name), false)),
            );
        }

        Ok((selected.into_iter().collect(), warnings))
    }

    fn backup_fonts(&self, name: &str, utility: &UtilityConfig) -> BackupReport {
        let mut report = BackupReport::new(name);
        let source_dir = self.font_source_dir(utility);
        if !source_dir.is_dir() {
            let message = SyncError::MissingSource(source_dir.clone()).to_string();
            warn!("{}: {}", name, message);
            report.warnings.push(message);
            report.missing.push(source_dir);
            return report;
        }

        let (files, warnings) = match self.select_fonts(utility) {
            Ok(selection) => selection,
            Err(e) => {
                report.failures.push(format!("{:#}", e));
                return report;
            }
        };
        report.warnings.extend(warnings);

        let dest_root = self.paths.utility_backup_dir(name);
        self.announce(&mut report.actions, format!("clear {}", dest_root.display()));
        if !self.dry_run {
            if let Err(e) = remove_path(&dest_root).and_then(|_| {
                std::fs::create_dir_all(&dest_root).map_err(anyhow::Error::from)
            }) {
                report.failures.push(format!("{:#}", e));
                return report;
            }
        }

        for file in files {
            let src = source_dir.join(&file);
            let dest = dest_root.join(&file);
            self.announce(&mut report.actions, format!("copy {} -> {}", src.display(), dest.display()));
            if self.dry_run {
                report.items_copied += 1;
                continue;
            }
            match copy_file_preserving(&src, &dest) {
                Ok(()) => report.items_copied += 1,
                Err(e) => report.failures.push(format!("{}: {:#}", src.display(), e)),
            }
        }

        info!("Backed up {} font files", report.items_copied);
        report
    }

    /// Pairs of (backup source, restore destination) for a utility
    fn restore_plan(&self, name: &str, utility: &UtilityConfig, warnings: &mut Vec<String>) -> Result<Vec<(PathBuf, PathBuf)>> {
        let backup_dir = self.paths.utility_backup_dir(name);
        let mut plan = Vec::new();

        if name == FONTS_UTILITY {
            let dest_dir = self.font_source_dir(utility);
            let mut names: Vec<String> = std::fs::read_dir(&backup_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|n| n != ".gitkeep")
                .collect();
            names.sort();
            for file in names {
                plan.push((backup_dir.join(&file), dest_dir.join(&file)));
            }
            return Ok(plan);
        }

        for raw in &utility.paths {
            let expanded = self.paths.expand(raw);
            let text = expanded.to_string_lossy();
            let target = Path::new(text.trim_end_matches('/'));
            let Some(leaf) = file_name_of(target) else {
                warnings.push(format!("Cannot restore '{}': no file name", raw));
                continue;
            };
            let components: Vec<Component> = target.components().collect();
            let parents = &components[..components.len().saturating_sub(1)];

            // (location under the backup directory, restore destination)
            let mut candidates = vec![(PathBuf::new(), PathBuf::new())];
            for component in parents {
                let part = component.as_os_str().to_string_lossy();
                if !has_glob_chars(&part) {
                    for (_, dest) in candidates.iter_mut() {
                        dest.push(component.as_os_str());
                    }
                    continue;
                }
                let pattern = Pattern::new(&part).map_err(|e| anyhow!("Invalid path pattern '{}': {}", raw, e))?;
                candidates = candidates
                    .iter()
                    .flat_map(|(rel, dest)| {
                        matching_entries(&backup_dir.join(rel), &pattern, true)
                            .into_iter()
                            .map(move |entry| (rel.join(&entry), dest.join(&entry)))
                    })
                    .collect();
            }
            if candidates.is_empty() {
                warnings.push(format!("No backup matches '{}'", raw));
                continue;
            }

            let leaf_pattern = if has_glob_chars(&leaf) {
                Some(Pattern::new(&leaf).map_err(|e| anyhow!("Invalid path pattern '{}': {}", raw, e))?)
            } else {
                None
            };
            for (rel, dest) in candidates {
                let dir = backup_dir.join(&rel);
                let sources = match &leaf_pattern {
                    Some(pattern) => matching_entries(&dir, pattern, false),
                    None if exists_no_follow(&dir.join(&leaf)) => vec![leaf.clone()],
                    None => {
                        debug!("No backup of {} for {}", dir.join(&leaf).display(), name);
                        Vec::new()
                    }
                };
                for source in sources {
                    plan.push((dir.join(&source), dest.join(&source)));
                }
            }
        }

        Ok(plan)
    }

    fn snapshot_dir(&self, name: &str) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let base = self.paths.restore_backups_dir.join(format!("{}_{}", name, stamp));
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n| self.paths.restore_backups_dir.join(format!("{}_{}_{}", name, stamp, n)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }

    /// Restore one utility from the working tree.
    ///
    /// Every destination that already exists is copied into a fresh
    /// `restore_backups/<name>_<timestamp>/` snapshot, laid out relative to
    /// the home directory, before anything is overwritten. A snapshot
    /// failure aborts the restore.
    pub fn restore_utility(&self, name: &str, utility: &UtilityConfig) -> Result<RestoreReport> {
        let backup_dir = self.paths.utility_backup_dir(name);
        if !backup_dir.is_dir() {
            return Err(SyncError::NoBackup(name.to_string()).into());
        }

        let mut report = RestoreReport {
            utility: name.to_string(),
            ..Default::default()
        };
        let plan = self.restore_plan(name, utility, &mut report.warnings)?;
        if plan.is_empty() {
            report.warnings.push(format!("Nothing to restore for {}", name));
            return Ok(report);
        }

        let existing: Vec<&PathBuf> = plan.iter().map(|(_, dest)| dest).filter(|d| exists_no_follow(d)).collect();
        if !existing.is_empty() {
            let snapshot = self.snapshot_dir(name);
            for dest in existing {
                let saved = snapshot.join(self.paths.relative_to_home(dest));
                self.announce(&mut report.actions, format!("save {} -> {}", dest.display(), saved.display()));
                if !self.dry_run {
                    replace_with_copy(dest, &saved)
                        .with_context(|| format!("Safety backup of {} failed, nothing was restored", dest.display()))?;
                }
            }
            report.safety_backup = Some(snapshot);
        }

        for (source, dest) in &plan {
            self.announce(&mut report.actions, format!("restore {} -> {}", source.display(), dest.display()));
            if self.dry_run {
                continue;
            }
            match replace_with_copy(source, dest) {
                Ok(_) => report.items_restored += 1,
                Err(e) => {
                    warn!("Failed to restore {}: {:#}", dest.display(), e);
                    report.failures.push(format!("{}: {:#}", dest.display(), e));
                }
            }
        }

        info!("Restored {} ({} items)", name, report.items_restored);
        Ok(report)
    }

    /// Size of the sources that a backup of this utility would read
    pub fn estimate_utility_size(&self, name: &str, utility: &UtilityConfig) -> UtilitySize {
        let mut details = Vec::new();
        for raw in &utility.paths {
            for path in self.paths.expand_existing(raw) {
                let size = path_size(&path);
                details.push((path.display().to_string(), size));
            }
        }
        UtilitySize {
            utility: name.to_string(),
            total: details.iter().map(|(_, size)| size).sum(),
            details,
        }
    }
}

async fn run_rsync(rsync: &Path, source: &Path, dest: &Path, excludes: &ExcludeSet) -> Result<()> {
    let mut command = tokio::process::Command::new(rsync);
    command.arg("-a").arg("--delete").arg("--delete-excluded");
    for pattern in excludes.raw_patterns() {
        command.arg(format!("--exclude={}", pattern));
    }
    // Trailing slash copies the directory contents, not the directory itself
    command
        .arg(format!("{}/", source.display()))
        .arg(format!("{}/", dest.display()));

    let output = command.output().await.context("Failed to run rsync")?;
    if !output.status.success() {
        return Err(anyhow!(
            "rsync failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
