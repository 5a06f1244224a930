//! Filesystem layout of the application directory
//!
//! Every component receives an [`AppPaths`] built once at startup instead of
//! reading module-level constants, so tests can point the whole tool at a
//! temporary home directory.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Overrides the application directory (defaults to `~/.mac-sync-wizard`)
pub const APP_DIR_ENV: &str = "MAC_SYNC_WIZARD_HOME";

const APP_DIR_NAME: &str = ".mac-sync-wizard";

/// Resolved locations of every file and directory the tool touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// User home directory, used for `~` expansion and restore snapshots
    pub home: PathBuf,
    pub app_dir: PathBuf,
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
    /// Local git working tree
    pub repo_dir: PathBuf,
    pub last_sync_file: PathBuf,
    pub lock_file: PathBuf,
    pub restore_backups_dir: PathBuf,
    pub launch_agents_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths for the current user
    pub fn discover() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;

        let app_dir = match std::env::var_os(APP_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => home.join(APP_DIR_NAME),
        };

        Ok(Self::with_root(home, app_dir))
    }

    /// Build the layout under an explicit home and application directory
    pub fn with_root(home: impl Into<PathBuf>, app_dir: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let app_dir = app_dir.into();
        let config_dir = app_dir.join("config");

        Self {
            config_path: config_dir.join("sync_config.json"),
            config_dir,
            logs_dir: app_dir.join("logs"),
            repo_dir: app_dir.join("repo"),
            last_sync_file: app_dir.join("last_sync"),
            lock_file: app_dir.join("sync.lock"),
            restore_backups_dir: app_dir.join("restore_backups"),
            launch_agents_dir: home.join("Library").join("LaunchAgents"),
            home,
            app_dir,
        }
    }

    /// Create the config, logs and repository directories
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.logs_dir, &self.repo_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir.join("mac-sync-wizard.log")
    }

    pub fn setup_progress_path(&self) -> PathBuf {
        self.config_dir.join(".setup_progress.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.repo_dir.join("backups")
    }

    /// `backups/<utility>/` inside the working tree
    pub fn utility_backup_dir(&self, utility: &str) -> PathBuf {
        self.backups_dir().join(utility)
    }

    pub fn fonts_dir(&self) -> PathBuf {
        self.home.join("Library").join("Fonts")
    }

    /// Expand a leading `~` against this layout's home directory
    pub fn expand(&self, raw: &str) -> PathBuf {
        let home = self.home.to_string_lossy().into_owned();
        let expanded = shellexpand::tilde_with_context(raw, || Some(home.as_str()));
        PathBuf::from(expanded.as_ref())
    }

    /// Expand `~` and any glob characters, returning the paths that exist.
    ///
    /// A path without glob characters is returned as-is when it exists. A
    /// trailing slash is ignored for matching.
    pub fn expand_existing(&self, raw: &str) -> Vec<PathBuf> {
        let expanded = self.expand(raw);
        let text = expanded.to_string_lossy();
        let trimmed = text.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };

        if !has_glob_chars(trimmed) {
            let path = PathBuf::from(trimmed);
            return if path.exists() || path.symlink_metadata().is_ok() {
                vec![path]
            } else {
                Vec::new()
            };
        }

        match glob::glob(trimmed) {
            Ok(entries) => {
                let mut found: Vec<PathBuf> = entries
                    .filter_map(|entry| match entry {
                        Ok(path) => Some(path),
                        Err(e) => {
                            debug!("Skipping unreadable glob match: {}", e);
                            None
                        }
                    })
                    .collect();
                found.sort();
                found
            }
            Err(e) => {
                warn!("Invalid path pattern '{}': {}", raw, e);
                Vec::new()
            }
        }
    }

    /// Path of `target` relative to the home directory.
    ///
    /// Paths outside home keep their full structure minus the root.
    pub fn relative_to_home(&self, target: &Path) -> PathBuf {
        match target.strip_prefix(&self.home) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => target
                .components()
                .filter(|c| matches!(c, std::path::Component::Normal(_)))
                .collect(),
        }
    }
}

pub fn has_glob_chars(text: &str) -> bool {
    text.contains(|c: char| matches!(c, '*' | '?' | '['))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_under_app_dir() {
        let paths = AppPaths::with_root("/Users/me", "/Users/me/.mac-sync-wizard");

        assert_eq!(paths.config_path, PathBuf::from("/Users/me/.mac-sync-wizard/config/sync_config.json"));
        assert_eq!(paths.repo_dir, PathBuf::from("/Users/me/.mac-sync-wizard/repo"));
        assert_eq!(paths.lock_file, PathBuf::from("/Users/me/.mac-sync-wizard/sync.lock"));
        assert_eq!(paths.last_sync_file, PathBuf::from("/Users/me/.mac-sync-wizard/last_sync"));
        assert_eq!(paths.launch_agents_dir, PathBuf::from("/Users/me/Library/LaunchAgents"));
        assert_eq!(
            paths.utility_backup_dir("git"),
            PathBuf::from("/Users/me/.mac-sync-wizard/repo/backups/git")
        );
    }

    #[test]
    fn test_expand_uses_layout_home() {
        let paths = AppPaths::with_root("/tmp/fake-home", "/tmp/fake-home/.app");
        assert_eq!(paths.expand("~/.gitconfig"), PathBuf::from("/tmp/fake-home/.gitconfig"));
        assert_eq!(paths.expand("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_expand_existing_with_glob() {
        let temp = TempDir::new().unwrap();
        let home = temp.path();
        std::fs::create_dir_all(home.join("JetBrains/PyCharm2023.1/options")).unwrap();
        std::fs::create_dir_all(home.join("JetBrains/PyCharm2024.2/options")).unwrap();
        std::fs::create_dir_all(home.join("JetBrains/IntelliJ/options")).unwrap();

        let paths = AppPaths::with_root(home, home.join(".app"));
        let found = paths.expand_existing("~/JetBrains/PyCharm*/options/");

        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("PyCharm2023.1/options"));
        assert!(found[1].ends_with("PyCharm2024.2/options"));
    }

    #[test]
    fn test_expand_existing_missing_path() {
        let temp = TempDir::new().unwrap();
        let paths = AppPaths::with_root(temp.path(), temp.path().join(".app"));
        assert!(paths.expand_existing("~/does/not/exist").is_empty());
        assert!(paths.expand_existing("~/nothing*/here").is_empty());
    }

    #[test]
    #[serial_test::serial]
    fn test_discover_honors_app_dir_override() {
        let temp = TempDir::new().unwrap();
        let previous = std::env::var_os(APP_DIR_ENV);

        std::env::set_var(APP_DIR_ENV, temp.path());
        let paths = AppPaths::discover().unwrap();
        assert_eq!(paths.app_dir, temp.path());
        assert_eq!(paths.repo_dir, temp.path().join("repo"));

        std::env::set_var(APP_DIR_ENV, "");
        let paths = AppPaths::discover().unwrap();
        assert_eq!(paths.app_dir, paths.home.join(".mac-sync-wizard"));

        match previous {
            Some(value) => std::env::set_var(APP_DIR_ENV, value),
            None => std::env::remove_var(APP_DIR_ENV),
        }
    }

    #[test]
    fn test_relative_to_home() {
        let paths = AppPaths::with_root("/Users/me", "/Users/me/.app");
        assert_eq!(
            paths.relative_to_home(Path::new("/Users/me/Library/Fonts")),
            PathBuf::from("Library/Fonts")
        );
        assert_eq!(paths.relative_to_home(Path::new("/opt/tool/conf")), PathBuf::from("opt/tool/conf"));
    }
}
