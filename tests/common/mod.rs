//! Common test utilities and helpers for mac-sync-wizard tests
#![allow(dead_code)]

use mac_sync_wizard::config::UtilityConfig;
use mac_sync_wizard::{AppPaths, Config, GitClient, SystemGit};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

/// Environment for git invocations that must not depend on the developer's setup
const GIT_ENV: [(&str, &str); 7] = [
    ("GIT_AUTHOR_NAME", "Sync Test"),
    ("GIT_AUTHOR_EMAIL", "sync-test@example.com"),
    ("GIT_COMMITTER_NAME", "Sync Test"),
    ("GIT_COMMITTER_EMAIL", "sync-test@example.com"),
    ("GIT_CONFIG_NOSYSTEM", "1"),
    ("GIT_CONFIG_GLOBAL", "/dev/null"),
    ("GIT_TERMINAL_PROMPT", "0"),
];

/// A temporary home directory plus a bare repository acting as `origin`
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub paths: AppPaths,
    pub remote: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let home = temp_dir.path().join("home");
        let paths = AppPaths::with_root(&home, home.join(".mac-sync-wizard"));
        paths.ensure_dirs().expect("Failed to create app dirs");

        let remote = temp_dir.path().join("remote.git");
        std::fs::create_dir_all(&remote).expect("Failed to create remote dir");
        run_git(&remote, &["init", "--bare"]);

        Self {
            temp_dir,
            paths,
            remote,
        }
    }

    pub fn remote_url(&self) -> String {
        format!("file://{}", self.remote.display())
    }

    /// Git client for this environment's working tree
    pub fn git(&self) -> GitClient {
        git_client(&self.paths.repo_dir)
    }

    /// Layout for a second machine sharing the same remote
    pub fn other_machine(&self, name: &str) -> AppPaths {
        let home = self.temp_dir.path().join(name);
        let paths = AppPaths::with_root(&home, home.join(".mac-sync-wizard"));
        paths.ensure_dirs().expect("Failed to create app dirs");
        paths
    }

    /// Configuration pointing at the bare remote with only the given utilities
    pub fn config(&self, utilities: Vec<(&str, UtilityConfig)>) -> Config {
        let mut config = Config::default();
        config.repository.url = self.remote_url();
        config.utilities = utilities
            .into_iter()
            .map(|(name, utility)| (name.to_string(), utility))
            .collect();
        config
    }

    pub fn write_home_file(&self, relative: &str, content: impl AsRef<[u8]>) -> PathBuf {
        let path = self.paths.home.join(relative);
        std::fs::create_dir_all(path.parent().expect("file has a parent")).expect("Failed to create parent");
        std::fs::write(&path, content).expect("Failed to write home file");
        path
    }

    /// Files tracked on the remote's `branch`
    pub fn remote_files(&self, branch: &str) -> Vec<String> {
        run_git(&self.remote, &["ls-tree", "-r", "--name-only", branch])
            .lines()
            .map(str::to_string)
            .collect()
    }
}

pub fn git_client(repo_dir: &Path) -> GitClient {
    let executor = GIT_ENV
        .iter()
        .fold(SystemGit::new(), |git, (key, value)| git.with_env(*key, *value));
    GitClient::with_executor(repo_dir, Arc::new(executor))
}

/// Run git directly and return stdout, panicking on failure
pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .envs(GIT_ENV)
        .output()
        .expect("Failed to execute git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Commit everything in `dir` and push it
pub fn commit_and_push(dir: &Path, message: &str) {
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "-m", message]);
    run_git(dir, &["push", "origin", "HEAD"]);
}

pub fn utility(paths: &[&str], excludes: &[&str]) -> UtilityConfig {
    UtilityConfig {
        enabled: true,
        paths: paths.iter().map(|p| p.to_string()).collect(),
        exclude_patterns: excludes.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

/// Every working tree file under `root` with its bytes, for before/after comparisons.
///
/// `.git` is skipped since read-only commands may refresh the index.
pub fn snapshot_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    if !root.exists() {
        return BTreeMap::new();
    }
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let rel = entry.path().strip_prefix(root).expect("under root").to_path_buf();
            let bytes = std::fs::read(entry.path()).expect("readable file");
            (rel, bytes)
        })
        .collect()
}
