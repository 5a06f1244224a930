use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::paths::AppPaths;

/// Name of the utility handled by the font-specific backup path
pub const FONTS_UTILITY: &str = "fonts";

/// Main configuration structure, persisted as JSON
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// Remote repository settings
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncSettings,

    /// Desktop notification preferences
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Utility name -> what to back up
    #[serde(default = "default_utilities")]
    pub utilities: BTreeMap<String, UtilityConfig>,

    /// Keys this version does not know about, kept so a save round-trips them
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// "ssh" or "https"
    #[serde(default = "default_auth_type")]
    pub auth_type: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SyncSettings {
    /// Seconds between automatic syncs, 0 for manual only
    #[serde(default = "default_frequency")]
    pub frequency_seconds: u64,

    #[serde(default = "default_true")]
    pub auto_commit: bool,

    /// Supports `{date}` and `{changes}` placeholders
    #[serde(default = "default_commit_template")]
    pub commit_message_template: String,

    #[serde(default)]
    pub pull_strategy: PullStrategy,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PullStrategy {
    #[default]
    Rebase,
    Merge,
}

impl PullStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullStrategy::Rebase => "rebase",
            PullStrategy::Merge => "merge",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NotificationConfig {
    #[serde(default)]
    pub level: NotificationLevel,

    /// Preferred delivery tool, falls back to osascript when missing
    #[serde(default = "default_notification_method")]
    pub method: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    All,
    #[default]
    #[serde(alias = "errors")]
    ErrorsOnly,
    None,
}

impl NotificationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::All => "all",
            NotificationLevel::ErrorsOnly => "errors_only",
            NotificationLevel::None => "none",
        }
    }
}

/// One backed-up application or settings group
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct UtilityConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Source paths, `~` and glob characters allowed
    #[serde(default)]
    pub paths: Vec<String>,

    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Fonts only: copy just the files matching these patterns
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_patterns: Vec<String>,

    /// Fonts only: family names as shown in Font Book
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_fonts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UtilityConfig {
    fn new(enabled: bool, paths: &[&str], exclude_patterns: &[&str]) -> Self {
        Self {
            enabled,
            paths: paths.iter().map(|p| p.to_string()).collect(),
            exclude_patterns: exclude_patterns.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    fn described(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// True when any configured path exists on this machine
    pub fn is_installed(&self, paths: &AppPaths) -> bool {
        self.paths.iter().any(|raw| !paths.expand_existing(raw).is_empty())
    }
}

// Default value functions
fn default_branch() -> String {
    "main".to_string()
}

fn default_auth_type() -> String {
    "ssh".to_string()
}

fn default_frequency() -> u64 {
    21600 // 6 hours
}

fn default_true() -> bool {
    true
}

fn default_commit_template() -> String {
    "Auto-sync: {date} - {changes}".to_string()
}

fn default_notification_method() -> String {
    "terminal-notifier".to_string()
}

/// Built-in utility table
pub fn default_utilities() -> BTreeMap<String, UtilityConfig> {
    let app_support = "~/Library/Application Support";
    let pycharm_dirs = [
        "options", "keymaps", "codestyles", "templates", "colors", "fileTemplates", "inspection", "tools",
        "shelf",
    ];
    let pycharm_paths: Vec<String> = pycharm_dirs
        .iter()
        .map(|dir| format!("{}/JetBrains/PyCharm*/{}/", app_support, dir))
        .collect();
    let pycharm_refs: Vec<&str> = pycharm_paths.iter().map(String::as_str).collect();

    let mut fonts = UtilityConfig::new(true, &["~/Library/Fonts/"], &[]);
    fonts.description = Some("User-installed fonts".to_string());

    let entries = [
        (
            "cursor",
            UtilityConfig::new(
                true,
                &[
                    "~/Library/Application Support/Cursor/User/keybindings.json",
                    "~/Library/Application Support/Cursor/User/settings.json",
                    "~/Library/Application Support/Cursor/User/extensions/",
                ],
                &["*.log", "Cache/*"],
            ),
        ),
        (
            "pycharm",
            UtilityConfig::new(
                true,
                &pycharm_refs,
                &[
                    "*.log", "Cache/*", "workspace/", "tasks/", "scratches/", "jdbc-drivers/", "ssl/", "port",
                    "plugins/updatedPlugins.xml", "marketplace/", "*.hprof", "*.snapshot", "eval/", "repair/",
                    "*/.DS_Store",
                ],
            ),
        ),
        (
            "sublime",
            UtilityConfig::new(
                true,
                &["~/Library/Application Support/Sublime Text/Packages/User/"],
                &["*.log", "Cache/*"],
            ),
        ),
        (
            "trackpad",
            UtilityConfig::new(
                true,
                &[
                    "~/Library/Preferences/com.apple.driver.AppleBluetoothMultitouch.trackpad.plist",
                    "~/Library/Preferences/com.apple.AppleMultitouchTrackpad.plist",
                ],
                &[],
            ),
        ),
        ("git", UtilityConfig::new(true, &["~/.gitconfig", "~/.config/git/"], &[])),
        (
            "warp",
            UtilityConfig::new(
                true,
                &[
                    "~/.warp/themes/",
                    "~/.warp/launch_configurations/",
                    "~/.warp/user_scripts/",
                    "~/.warp/settings.yaml",
                    "~/.warp/keybindings.json",
                ],
                &["Cache/*", "*.log", "*.pyc", "__pycache__", "*.sock", "*.pid"],
            ),
        ),
        (FONTS_UTILITY, fonts),
        (
            "anki",
            UtilityConfig::new(
                true,
                &[
                    "~/Library/Application Support/Anki2/addons21/",
                    "~/Library/Application Support/Anki2/prefs21.db",
                ],
                &["*.log"],
            ),
        ),
        (
            "stretchly",
            UtilityConfig::new(true, &["~/Library/Application Support/stretchly/"], &["*.log"]),
        ),
        (
            "maccy",
            UtilityConfig::new(
                true,
                &["~/Library/Containers/org.p0deje.Maccy/Data/Library/Preferences/org.p0deje.Maccy.plist"],
                &[],
            ),
        ),
        (
            "shell",
            UtilityConfig::new(true, &["~/.mac-sync-wizard/shell/"], &[])
                .described("Shell aliases, functions, and custom configurations"),
        ),
        (
            "arc",
            UtilityConfig::new(
                false,
                &[
                    "~/Library/Application Support/Arc/",
                    "~/Library/Preferences/company.thebrowser.Arc.plist",
                ],
                &["Cache/*", "*.log"],
            ),
        ),
        (
            "logi",
            UtilityConfig::new(
                false,
                &[
                    "~/Library/Preferences/com.logi.optionsplus.plist",
                    "~/Library/Application Support/LogiOptionsPlus/config.json",
                    "~/Library/Application Support/LogiOptionsPlus/settings.db",
                    "~/Library/Application Support/LogiOptionsPlus/macros.db",
                    "~/Library/Application Support/LogiOptionsPlus/permissions.json",
                    "~/Library/Application Support/LogiOptionsPlus/cc_config.json",
                ],
                &[],
            ),
        ),
        (
            "1password",
            UtilityConfig::new(
                false,
                &[
                    "~/Library/Application Support/1Password/",
                    "~/Library/Preferences/com.1password.1password.plist",
                ],
                &["*.log", "Cache/*"],
            ),
        ),
    ];

    entries
        .into_iter()
        .map(|(name, utility)| (name.to_string(), utility))
        .collect()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
            auth_type: default_auth_type(),
            extra: Map::new(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            frequency_seconds: default_frequency(),
            auto_commit: true,
            commit_message_template: default_commit_template(),
            pull_strategy: PullStrategy::Rebase,
            extra: Map::new(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            level: NotificationLevel::ErrorsOnly,
            method: default_notification_method(),
            extra: Map::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            repository: RepositoryConfig::default(),
            sync: SyncSettings::default(),
            notifications: NotificationConfig::default(),
            utilities: default_utilities(),
            extra: Map::new(),
        }
    }
}

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base value.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Rename keys written by older versions of the tool
fn migrate_legacy_keys(document: &mut Value) {
    if let Some(sync) = document.get_mut("sync").and_then(Value::as_object_mut) {
        if let Some(frequency) = sync.remove("frequency") {
            sync.entry("frequency_seconds").or_insert(frequency);
        }
    }
}

impl Config {
    /// Merge a loaded document onto the built-in defaults
    pub fn from_document(mut document: Value) -> Result<Self> {
        if !document.is_object() {
            return Err(anyhow!("Configuration must be a JSON object"));
        }
        migrate_legacy_keys(&mut document);

        let mut merged =
            serde_json::to_value(Config::default()).context("Failed to serialize default configuration")?;
        deep_merge(&mut merged, document);

        serde_json::from_value(merged).context("Configuration has invalid values")
    }

    /// Load configuration from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let document: Value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let config = Self::from_document(document)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration, writing the defaults first if the file is missing
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        info!("No configuration found, creating defaults at {}", path.display());
        let config = Config::default();
        config.save(path)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    pub fn is_repository_configured(&self) -> bool {
        !self.repository.url.trim().is_empty()
    }

    /// Enabled utilities in name order
    pub fn enabled_utilities(&self) -> Vec<(&str, &UtilityConfig)> {
        self.utilities
            .iter()
            .filter(|(_, utility)| utility.enabled)
            .map(|(name, utility)| (name.as_str(), utility))
            .collect()
    }

    pub fn utility(&self, name: &str) -> Result<&UtilityConfig, SyncError> {
        self.utilities
            .get(name)
            .ok_or_else(|| SyncError::UnknownUtility(name.to_string()))
    }

    pub fn set_utility_enabled(&mut self, name: &str, enabled: bool) -> Result<(), SyncError> {
        let utility = self
            .utilities
            .get_mut(name)
            .ok_or_else(|| SyncError::UnknownUtility(name.to_string()))?;
        utility.enabled = enabled;
        Ok(())
    }

    /// Utilities whose paths exist on this machine
    pub fn installed_utilities(&self, paths: &AppPaths) -> Vec<String> {
        self.utilities
            .iter()
            .filter(|(_, utility)| utility.is_installed(paths))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fill the commit message template
    pub fn render_commit_message<Tz: TimeZone>(&self, date: &DateTime<Tz>, utility_count: usize) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        self.sync
            .commit_message_template
            .replace("{date}", &date.format("%Y-%m-%d %H:%M:%S").to_string())
            .replace("{changes}", &format!("{} utilities", utility_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quickcheck_macros::quickcheck;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.repository.url, "");
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.repository.auth_type, "ssh");
        assert_eq!(config.sync.frequency_seconds, 21600);
        assert!(config.sync.auto_commit);
        assert_eq!(config.sync.pull_strategy, PullStrategy::Rebase);
        assert_eq!(config.notifications.level, NotificationLevel::ErrorsOnly);
        assert!(config.utilities["git"].enabled);
        assert!(!config.utilities["1password"].enabled);
        assert_eq!(config.utilities["pycharm"].paths.len(), 9);
    }

    #[test]
    fn test_partial_document_keeps_user_values() {
        let document = json!({
            "repository": { "url": "git@github.com:me/dotfiles.git" },
            "sync": { "pull_strategy": "merge" },
            "utilities": { "git": { "enabled": false } }
        });

        let config = Config::from_document(document).unwrap();

        assert_eq!(config.repository.url, "git@github.com:me/dotfiles.git");
        assert_eq!(config.repository.branch, "main");
        assert_eq!(config.sync.pull_strategy, PullStrategy::Merge);
        assert_eq!(config.sync.frequency_seconds, 21600);
        assert!(!config.utilities["git"].enabled);
        // Paths come from the defaults even though the document only set the flag
        assert_eq!(config.utilities["git"].paths, vec!["~/.gitconfig", "~/.config/git/"]);
        assert!(config.utilities.contains_key("warp"));
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_config.json");
        std::fs::write(
            &path,
            r#"{
                "theme": "dark",
                "repository": { "url": "https://example.com/r.git", "mirror": "backup" },
                "utilities": { "custom": { "enabled": true, "paths": ["~/.customrc"], "setup_on_enable": true } }
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        config.save(&path).unwrap();

        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["theme"], "dark");
        assert_eq!(saved["repository"]["mirror"], "backup");
        assert_eq!(saved["utilities"]["custom"]["setup_on_enable"], true);
        assert_eq!(saved["utilities"]["custom"]["exclude_patterns"], json!([]));
    }

    #[test]
    fn test_legacy_frequency_key() {
        let config = Config::from_document(json!({ "sync": { "frequency": 900 } })).unwrap();
        assert_eq!(config.sync.frequency_seconds, 900);
    }

    #[test]
    fn test_errors_alias_for_notification_level() {
        let config = Config::from_document(json!({ "notifications": { "level": "errors" } })).unwrap();
        assert_eq!(config.notifications.level, NotificationLevel::ErrorsOnly);
    }

    #[test]
    fn test_non_object_document_rejected() {
        assert!(Config::from_document(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_load_invalid_json_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sync_config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config").join("sync_config.json");

        let config = Config::load_or_create(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config, Config::default());
        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_set_utility_enabled() {
        let mut config = Config::default();
        config.set_utility_enabled("arc", true).unwrap();
        assert!(config.utilities["arc"].enabled);

        let err = config.set_utility_enabled("nope", true).unwrap_err();
        assert!(matches!(err, SyncError::UnknownUtility(name) if name == "nope"));
    }

    #[test]
    fn test_enabled_utilities_sorted() {
        let config = Config::default();
        let names: Vec<&str> = config.enabled_utilities().iter().map(|(name, _)| *name).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(!names.contains(&"arc"));
        assert!(names.contains(&"fonts"));
    }

    #[test]
    fn test_render_commit_message() {
        let config = Config::default();
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(
            config.render_commit_message(&date, 4),
            "Auto-sync: 2024-03-09 14:05:00 - 4 utilities"
        );
    }

    #[test]
    fn test_installed_utilities() {
        let temp = TempDir::new().unwrap();
        let home = temp.path();
        std::fs::write(home.join(".gitconfig"), "[user]\n").unwrap();
        let paths = AppPaths::with_root(home, home.join(".mac-sync-wizard"));

        let installed = Config::default().installed_utilities(&paths);
        assert_eq!(installed, vec!["git".to_string()]);
    }

    #[test]
    fn test_deep_merge_replaces_arrays() {
        let mut base = json!({ "a": { "list": [1, 2], "keep": true } });
        deep_merge(&mut base, json!({ "a": { "list": [3] } }));
        assert_eq!(base, json!({ "a": { "list": [3], "keep": true } }));
    }

    /// Any subset of sync settings overrides exactly those keys and nothing else
    #[quickcheck]
    fn prop_merge_keeps_defaults_and_overrides(frequency: Option<u32>, auto_commit: Option<bool>, branch: Option<String>) -> bool {
        let mut document = json!({ "sync": {}, "repository": {} });
        if let Some(f) = frequency {
            document["sync"]["frequency_seconds"] = json!(f);
        }
        if let Some(a) = auto_commit {
            document["sync"]["auto_commit"] = json!(a);
        }
        if let Some(b) = &branch {
            document["repository"]["branch"] = json!(b);
        }

        let config = match Config::from_document(document) {
            Ok(config) => config,
            Err(_) => return false,
        };
        let defaults = Config::default();

        config.sync.frequency_seconds == frequency.map(u64::from).unwrap_or(defaults.sync.frequency_seconds)
            && config.sync.auto_commit == auto_commit.unwrap_or(defaults.sync.auto_commit)
            && config.repository.branch == branch.unwrap_or(defaults.repository.branch)
            && config.sync.commit_message_template == defaults.sync.commit_message_template
            && config.utilities.keys().eq(defaults.utilities.keys())
    }
}
