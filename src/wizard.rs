//! Interactive setup wizard and configuration menu

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input, MultiSelect, Select};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::agent;
use crate::config::{Config, NotificationLevel, PullStrategy, FONTS_UTILITY};
use crate::fonts;
use crate::git::{validate_repo_url, BranchResolution, GitClient};
use crate::paths::AppPaths;
use crate::shell::{self, SHELL_UTILITY};
use crate::ui;

pub const STEP_REPOSITORY: &str = "repository";
pub const STEP_UTILITIES: &str = "utilities";
pub const STEP_SYNC: &str = "sync";
pub const STEP_NOTIFICATIONS: &str = "notifications";

const SETUP_STEPS: [(&str, &str); 4] = [
    (STEP_REPOSITORY, "Repository"),
    (STEP_UTILITIES, "Utilities"),
    (STEP_SYNC, "Sync schedule"),
    (STEP_NOTIFICATIONS, "Notifications"),
];

/// Sync frequency choices offered by the wizard, in seconds
pub const FREQUENCY_CHOICES: [u64; 7] = [900, 1800, 3600, 21600, 43200, 86400, 0];

/// Wizard steps finished so far, so an interrupted setup can resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupProgress {
    #[serde(default)]
    pub completed: BTreeSet<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Local>>,
}

impl SetupProgress {
    /// `None` when no setup is in progress
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let progress = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(progress))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }

    pub fn is_done(&self, step: &str) -> bool {
        self.completed.contains(step)
    }

    pub fn mark(&mut self, step: &str, path: &Path) -> Result<()> {
        self.completed.insert(step.to_string());
        self.updated_at = Some(Local::now());
        self.save(path)
    }

    pub fn clear(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

/// Remove everything a previous setup created. Returns the removed paths.
pub fn fresh_reset(paths: &AppPaths, config_path: &Path) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for file in [
        config_path.to_path_buf(),
        paths.setup_progress_path(),
        paths.last_sync_file.clone(),
        paths.lock_file.clone(),
    ] {
        if file.exists() {
            std::fs::remove_file(&file).with_context(|| format!("Failed to remove {}", file.display()))?;
            removed.push(file);
        }
    }

    if paths.repo_dir.exists() {
        std::fs::remove_dir_all(&paths.repo_dir)
            .with_context(|| format!("Failed to remove {}", paths.repo_dir.display()))?;
        removed.push(paths.repo_dir.clone());
    }

    if agent::is_installed(paths) {
        let plist = agent::plist_path(paths);
        agent::uninstall(paths)?;
        removed.push(plist);
    }

    info!("Fresh setup removed {} items", removed.len());
    Ok(removed)
}

pub fn describe_frequency(seconds: u64) -> String {
    match seconds {
        0 => "Manual sync only".to_string(),
        s if s % 86400 == 0 => plural(s / 86400, "day"),
        s if s % 3600 == 0 => plural(s / 3600, "hour"),
        s if s % 60 == 0 => plural(s / 60, "minute"),
        s => plural(s, "second"),
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("Every {}", unit)
    } else {
        format!("Every {} {}s", n, unit)
    }
}

/// Comma separated input to a trimmed list
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run the first-time setup wizard
pub async fn run_setup(paths: &AppPaths, config_path: &Path, fresh: bool) -> Result<()> {
    let theme = ColorfulTheme::default();
    ui::print_header("Mac Sync Wizard Setup");

    if fresh {
        let confirmed = Confirm::with_theme(&theme)
            .with_prompt("This removes your configuration, local repository and LaunchAgent. Continue?")
            .default(false)
            .interact()?;
        if !confirmed {
            ui::print_info("Setup cancelled");
            return Ok(());
        }
        for path in fresh_reset(paths, config_path)? {
            ui::print_info(&format!("Removed {}", path.display()));
        }
    }

    paths.ensure_dirs()?;
    let progress_path = paths.setup_progress_path();
    let mut progress = match SetupProgress::load(&progress_path)? {
        Some(previous) if !previous.completed.is_empty() => {
            let resume = Confirm::with_theme(&theme)
                .with_prompt(format!(
                    "A previous setup stopped after {} of {} steps. Resume it?",
                    previous.completed.len(),
                    SETUP_STEPS.len()
                ))
                .default(true)
                .interact()?;
            if resume {
                previous
            } else {
                SetupProgress::default()
            }
        }
        _ => SetupProgress::default(),
    };

    let mut config = Config::load_or_create(config_path)?;

    for (index, (step, title)) in SETUP_STEPS.iter().enumerate() {
        if progress.is_done(step) {
            debug!("Skipping completed setup step {}", step);
            continue;
        }
        ui::print_step(index + 1, SETUP_STEPS.len(), title);

        match *step {
            STEP_REPOSITORY => configure_repository(&theme, &mut config, paths).await?,
            STEP_UTILITIES => configure_utilities(&theme, &mut config, paths)?,
            STEP_SYNC => configure_sync(&theme, &mut config)?,
            _ => configure_notifications(&theme, &mut config)?,
        }

        config.save(config_path)?;
        progress.mark(step, &progress_path)?;
    }

    SetupProgress::clear(&progress_path)?;
    ui::print_success(&format!("Configuration saved to {}", config_path.display()));

    if config.sync.frequency_seconds > 0 {
        let install = Confirm::with_theme(&theme)
            .with_prompt(format!(
                "Install a LaunchAgent to sync automatically ({})?",
                describe_frequency(config.sync.frequency_seconds).to_lowercase()
            ))
            .default(true)
            .interact()?;
        if install {
            match agent::install(paths, config.sync.frequency_seconds) {
                Ok(plist) => ui::print_success(&format!("LaunchAgent installed at {}", plist.display())),
                Err(e) => ui::print_warning(&format!("Could not install LaunchAgent: {:#}", e)),
            }
        }
    }

    println!();
    ui::print_info("Setup complete. Run 'mac-sync-wizard sync' to perform the first sync.");
    Ok(())
}

async fn configure_repository(theme: &ColorfulTheme, config: &mut Config, paths: &AppPaths) -> Result<()> {
    let choices = [
        "Create a new repository (empty remote)",
        "Connect to an existing repository",
        "Skip for now",
    ];
    let choice = Select::with_theme(theme)
        .with_prompt("How do you want to store your settings?")
        .items(&choices)
        .default(0)
        .interact()?;
    if choice == 2 {
        ui::print_warning("No repository configured; syncing is disabled until you add one");
        return Ok(());
    }

    let url: String = Input::with_theme(theme)
        .with_prompt("Repository URL (git@github.com:you/mac-settings.git)")
        .with_initial_text(config.repository.url.clone())
        .validate_with(|input: &String| validate_repo_url(input).map_err(|e| e.to_string()))
        .interact_text()?;
    let branch: String = Input::with_theme(theme)
        .with_prompt("Branch")
        .default(config.repository.branch.clone())
        .interact_text()?;

    config.repository.url = url.trim().to_string();
    config.repository.branch = branch.trim().to_string();

    let git = GitClient::new(paths.repo_dir.clone());
    let report = git
        .init_repository(&config.repository.url, &config.repository.branch)
        .await
        .context("Repository setup failed")?;

    let how = match report.resolution {
        BranchResolution::AlreadyOn => "already on",
        BranchResolution::SwitchedLocal => "switched to local",
        BranchResolution::TrackingRemote => "tracking remote",
        BranchResolution::CreatedNew => "created new",
    };
    ui::print_success(&format!("Repository ready ({} branch {})", how, config.repository.branch));
    if report.created && !report.pushed {
        ui::print_warning("Initial push failed; it will be retried on the next sync");
    }
    Ok(())
}

fn configure_utilities(theme: &ColorfulTheme, config: &mut Config, paths: &AppPaths) -> Result<()> {
    let installed: BTreeSet<String> = config.installed_utilities(paths).into_iter().collect();
    let names: Vec<String> = config.utilities.keys().cloned().collect();

    let items: Vec<String> = names
        .iter()
        .map(|name| {
            let utility = &config.utilities[name];
            let detail = utility
                .description
                .clone()
                .or_else(|| utility.paths.first().cloned())
                .unwrap_or_default();
            let marker = if installed.contains(name) { " (installed)" } else { "" };
            format!("{}{} - {}", name, marker, detail)
        })
        .collect();
    let defaults: Vec<bool> = names
        .iter()
        .map(|name| config.utilities[name].enabled && installed.contains(name))
        .collect();

    let chosen = MultiSelect::with_theme(theme)
        .with_prompt("Select utilities to sync (space to toggle)")
        .items(&items)
        .defaults(&defaults)
        .interact()?;

    for (index, name) in names.iter().enumerate() {
        config.set_utility_enabled(name, chosen.contains(&index))?;
    }
    ui::print_success(&format!("{} utilities enabled", chosen.len()));

    let fonts_enabled = config.utilities.get(FONTS_UTILITY).map(|u| u.enabled).unwrap_or(false);
    if fonts_enabled
        && Confirm::with_theme(theme)
            .with_prompt("Choose which fonts to sync?")
            .default(false)
            .interact()?
    {
        configure_fonts(config, paths)?;
    }

    let shell_enabled = config.utilities.get(SHELL_UTILITY).map(|u| u.enabled).unwrap_or(false);
    if shell_enabled
        && Confirm::with_theme(theme)
            .with_prompt("Extract your existing shell aliases so they sync?")
            .default(true)
            .interact()?
    {
        setup_shell_sync(theme, config, paths)?;
    }
    Ok(())
}

/// Collect aliases into the synced shell directory and offer to load it from the rc file
fn setup_shell_sync(theme: &ColorfulTheme, config: &Config, paths: &AppPaths) -> Result<()> {
    let dir = shell::shell_dir(config, paths);
    let rc_files = shell::find_rc_files(&paths.home);
    if rc_files.is_empty() {
        ui::print_warning(&format!(
            "No shell configuration files found; add aliases to {} by hand",
            dir.join("aliases.sh").display()
        ));
        return Ok(());
    }

    let aliases = shell::extract_aliases(&rc_files);
    shell::write_shell_files(&dir, &aliases)?;
    ui::print_success(&format!(
        "Extracted {} aliases from {} files into {}",
        aliases.len(),
        rc_files.len(),
        dir.display()
    ));
    for alias in aliases.iter().take(5) {
        println!("  {}", alias.trim());
    }
    if aliases.len() > 5 {
        println!("  ... and {} more", aliases.len() - 5);
    }

    let login_shell = std::env::var("SHELL").unwrap_or_default();
    let Some(rc) = shell::rc_for_shell(&paths.home, &login_shell).filter(|rc| rc.is_file()) else {
        debug!("No rc file for shell '{}'", login_shell);
        return Ok(());
    };
    if shell::has_loader(&rc, &dir, &paths.home)? {
        ui::print_info("Shell loader already configured");
        return Ok(());
    }
    if Confirm::with_theme(theme)
        .with_prompt(format!("Add the alias loader to {}?", rc.display()))
        .default(true)
        .interact()?
    {
        let copy = shell::install_loader(&rc, &dir, &paths.home)?;
        ui::print_success(&format!("Added loader to {} (previous version saved to {})", rc.display(), copy.display()));
        ui::print_info("Restart your shell to load the aliases");
    }
    Ok(())
}

fn configure_sync(theme: &ColorfulTheme, config: &mut Config) -> Result<()> {
    let labels: Vec<String> = FREQUENCY_CHOICES.iter().map(|s| describe_frequency(*s)).collect();
    let current = FREQUENCY_CHOICES
        .iter()
        .position(|s| *s == config.sync.frequency_seconds)
        .unwrap_or(3);
    let choice = Select::with_theme(theme)
        .with_prompt("How often should settings sync?")
        .items(&labels)
        .default(current)
        .interact()?;
    config.sync.frequency_seconds = FREQUENCY_CHOICES[choice];

    config.sync.auto_commit = Confirm::with_theme(theme)
        .with_prompt("Commit and push changes automatically?")
        .default(config.sync.auto_commit)
        .interact()?;

    let strategies = [PullStrategy::Rebase, PullStrategy::Merge];
    let labels: Vec<&str> = strategies.iter().map(PullStrategy::as_str).collect();
    let choice = Select::with_theme(theme)
        .with_prompt("Pull strategy")
        .items(&labels)
        .default(strategies.iter().position(|s| *s == config.sync.pull_strategy).unwrap_or(0))
        .interact()?;
    config.sync.pull_strategy = strategies[choice];
    Ok(())
}

fn configure_notifications(theme: &ColorfulTheme, config: &mut Config) -> Result<()> {
    let levels = [NotificationLevel::All, NotificationLevel::ErrorsOnly, NotificationLevel::None];
    let labels = ["Every sync", "Errors only", "Never"];
    let choice = Select::with_theme(theme)
        .with_prompt("When should notifications be shown?")
        .items(&labels)
        .default(levels.iter().position(|l| *l == config.notifications.level).unwrap_or(1))
        .interact()?;
    config.notifications.level = levels[choice];
    Ok(())
}

/// Choose how the fonts utility selects files
pub fn configure_fonts(config: &mut Config, paths: &AppPaths) -> Result<()> {
    let theme = ColorfulTheme::default();
    let choices = [
        "Pick font families from installed fonts",
        "Type font family names",
        "Use file name patterns (e.g. *.ttf)",
        "Sync all fonts except patterns",
        "Sync all fonts",
        "Keep current selection",
    ];
    let choice = Select::with_theme(&theme)
        .with_prompt("Which fonts should be synced?")
        .items(&choices)
        .default(0)
        .interact()?;

    let fonts_dir = paths.fonts_dir();
    let Some(utility) = config.utilities.get_mut(FONTS_UTILITY) else {
        ui::print_warning("The fonts utility is not configured");
        return Ok(());
    };

    match choice {
        0 => {
            let families = fonts::installed_font_families(&fonts_dir).unwrap_or_default();
            if families.is_empty() {
                ui::print_warning(&format!("No fonts found in {}", fonts_dir.display()));
                return Ok(());
            }
            let items: Vec<String> = families
                .iter()
                .map(|f| format!("{} ({} files)", f.name, f.files.len()))
                .collect();
            let defaults: Vec<bool> = families
                .iter()
                .map(|f| utility.custom_fonts.iter().any(|c| c.eq_ignore_ascii_case(&f.name)))
                .collect();
            let chosen = MultiSelect::with_theme(&theme)
                .with_prompt("Select font families (space to toggle)")
                .items(&items)
                .defaults(&defaults)
                .interact()?;
            utility.custom_fonts = chosen.into_iter().map(|i| families[i].name.clone()).collect();
            utility.include_patterns.clear();
        }
        1 => {
            let input: String = Input::with_theme(&theme)
                .with_prompt("Font families, comma separated")
                .with_initial_text(utility.custom_fonts.join(", "))
                .interact_text()?;
            utility.custom_fonts = split_list(&input);
            utility.include_patterns.clear();
            for family in &utility.custom_fonts {
                let files = fonts::font_files_for_family(&fonts_dir, family).unwrap_or_default();
                if files.is_empty() {
                    ui::print_warning(&format!("No font files found for '{}'", family));
                } else {
                    ui::print_info(&format!("{}: {} files", family, files.len()));
                }
            }
        }
        2 => {
            let input: String = Input::with_theme(&theme)
                .with_prompt("Include patterns, comma separated")
                .with_initial_text(utility.include_patterns.join(", "))
                .interact_text()?;
            utility.include_patterns = split_list(&input);
            utility.custom_fonts.clear();
        }
        3 => {
            let input: String = Input::with_theme(&theme)
                .with_prompt("Exclude patterns, comma separated")
                .with_initial_text(utility.exclude_patterns.join(", "))
                .interact_text()?;
            utility.exclude_patterns = split_list(&input);
            utility.custom_fonts.clear();
            utility.include_patterns.clear();
        }
        4 => {
            utility.custom_fonts.clear();
            utility.include_patterns.clear();
            utility.exclude_patterns.clear();
        }
        _ => return Ok(()),
    }

    ui::print_success("Font selection updated");
    Ok(())
}

/// Interactive editor for an existing configuration
pub async fn run_config_menu(paths: &AppPaths, config_path: &Path) -> Result<()> {
    let theme = ColorfulTheme::default();
    let mut config = Config::load_or_create(config_path)?;
    let mut dirty = false;

    loop {
        let choices = [
            "Repository",
            "Utilities",
            "Sync schedule",
            "Notifications",
            "Fonts",
            "Save and exit",
            "Exit without saving",
        ];
        let choice = Select::with_theme(&theme)
            .with_prompt("Configuration")
            .items(&choices)
            .default(0)
            .interact()?;

        match choice {
            0 => configure_repository(&theme, &mut config, paths).await?,
            1 => configure_utilities(&theme, &mut config, paths)?,
            2 => configure_sync(&theme, &mut config)?,
            3 => configure_notifications(&theme, &mut config)?,
            4 => configure_fonts(&mut config, paths)?,
            5 => {
                config.save(config_path)?;
                ui::print_success("Configuration saved");
                return Ok(());
            }
            _ => {
                if dirty
                    && !Confirm::with_theme(&theme)
                        .with_prompt("Discard unsaved changes?")
                        .default(false)
                        .interact()?
                {
                    continue;
                }
                return Ok(());
            }
        }
        dirty = true;
    }
}
