use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use dialoguer::Confirm;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mac_sync_wizard::backup::{human_size, BackupEngine};
use mac_sync_wizard::error::{class_of, exit_code_for, ErrorClass};
use mac_sync_wizard::health::CheckResult;
use mac_sync_wizard::sync::{self as sync_status, CommitStatus, NextSync, PullStatus, SyncSummary};
use mac_sync_wizard::{
    agent, ui, wizard, AppPaths, Config, Daemon, GitClient, HealthCheck, SyncEngine, SyncError, SyncLock,
    SyncOptions,
};

#[derive(Parser)]
#[command(name = "mac-sync-wizard")]
#[command(about = "Back up and restore macOS utility settings through a git repository")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to ~/.mac-sync-wizard/config/sync_config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the interactive setup wizard
    Setup {
        /// Remove existing configuration and repository first
        #[arg(long)]
        fresh: bool,
    },

    /// Back up enabled utilities and push them to the repository
    Sync {
        /// Keep running and sync on the configured schedule
        #[arg(long)]
        daemon: bool,

        /// Show what would be done without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Show size details for each utility
        #[arg(long)]
        verbose: bool,

        /// Skip the pre-flight checks
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Change configuration (no flags opens the interactive menu)
    Config {
        /// Sync frequency in seconds (0 for manual only)
        #[arg(long)]
        frequency: Option<u64>,

        /// Enable a utility
        #[arg(long, value_name = "NAME")]
        enable: Option<String>,

        /// Disable a utility
        #[arg(long, value_name = "NAME")]
        disable: Option<String>,

        /// Restore the default configuration
        #[arg(long)]
        reset: bool,

        /// Choose which fonts to sync
        #[arg(long)]
        fonts: bool,
    },

    /// Show sync status
    Status {
        /// List enabled utilities with their sizes
        #[arg(long)]
        verbose: bool,
    },

    /// Install the LaunchAgent for scheduled syncs
    Install {
        /// Remove the LaunchAgent instead
        #[arg(long)]
        uninstall: bool,
    },

    /// Restore settings from the repository
    Restore {
        /// Restore a single utility
        #[arg(long, value_name = "NAME")]
        utility: Option<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// System health check and diagnostics
    Doctor,

    /// Show help
    Help,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        ui::print_error(&format!("{:#}", e));
        std::process::exit(exit_code_for(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::discover()?;

    let verbose = cli.verbose
        || matches!(cli.command, Some(Commands::Sync { verbose: true, .. }));
    init_logging(verbose, &paths);

    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_path.clone());
    debug!("Using configuration {}", config_path.display());

    match cli.command {
        None | Some(Commands::Help) => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
        Some(Commands::Setup { fresh }) => wizard::run_setup(&paths, &config_path, fresh).await,
        Some(Commands::Sync {
            daemon,
            dry_run,
            verbose,
            skip_preflight,
        }) => {
            let options = SyncOptions {
                dry_run,
                verbose,
                skip_preflight,
            };
            cmd_sync(&paths, &config_path, options, daemon).await
        }
        Some(Commands::Config {
            frequency,
            enable,
            disable,
            reset,
            fonts,
        }) => cmd_config(&paths, &config_path, frequency, enable, disable, reset, fonts).await,
        Some(Commands::Status { verbose }) => cmd_status(&paths, &config_path, verbose),
        Some(Commands::Install { uninstall }) => cmd_install(&paths, &config_path, uninstall),
        Some(Commands::Restore { utility, yes }) => cmd_restore(&paths, &config_path, utility, yes).await,
        Some(Commands::Doctor) => {
            let config = Config::load_or_create(&config_path)?;
            let health = HealthCheck::run(&config, &paths).await;
            print_health_report(&health);
            Ok(())
        }
    }
}

/// Log to stderr and append to the log file in the logs directory
fn init_logging(verbose: bool, paths: &AppPaths) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let file_layer = std::fs::create_dir_all(&paths.logs_dir)
        .and_then(|_| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(paths.log_file())
        })
        .ok()
        .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
}

async fn cmd_sync(paths: &AppPaths, config_path: &std::path::Path, options: SyncOptions, daemon: bool) -> Result<()> {
    let config = Config::load_or_create(config_path)?;
    let engine = SyncEngine::new(config, paths.clone());

    if daemon {
        println!("🔄 Running in daemon mode (Ctrl+C to stop)");
        let mut daemon = Daemon::new(engine, options)?;
        let stats = daemon.run().await?;
        println!(
            "Daemon stopped: {} syncs, {} failed, {} skipped",
            stats.total_syncs, stats.failed_syncs, stats.skipped_syncs
        );
        return Ok(());
    }

    let summary = match engine.run(options).await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(SyncError::PreflightFailed(health)) = e.downcast_ref::<SyncError>() {
                print_health_report(health);
            }
            return Err(e);
        }
    };
    print_sync_summary(&summary, options.verbose);

    if summary.failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} utilities failed to back up", summary.failures.len()))
    }
}

fn print_sync_summary(summary: &SyncSummary, verbose: bool) {
    println!();
    if summary.dry_run {
        println!("🔍 Dry run - no changes were made");
        for action in &summary.actions {
            println!("  would {}", action);
        }
        println!();
    }

    match &summary.pull {
        PullStatus::Pulled(outcome) if outcome.fell_back_to_merge => {
            ui::print_warning("Pulled with a merge after a rebase conflict")
        }
        PullStatus::Pulled(_) => ui::print_success("Pulled latest changes"),
        PullStatus::Failed(e) => ui::print_warning(&format!("Pull failed: {}", e)),
        PullStatus::DryRun => {}
    }

    if verbose {
        for size in &summary.sizes {
            ui::print_field(&size.utility, &human_size(size.total));
        }
        ui::print_field("Total size to sync", &human_size(summary.total_size()));
    }

    for report in &summary.reports {
        if report.succeeded() {
            ui::print_success(&format!("{} ({} items)", report.utility, report.items_copied));
        }
    }
    for (utility, reason) in &summary.failures {
        ui::print_error(&format!("{}: {}", utility, reason));
    }
    for warning in &summary.warnings {
        ui::print_warning(warning);
    }

    match &summary.commit {
        Some(CommitStatus::Committed(message)) => ui::print_success(&format!("Committed: {}", message)),
        Some(CommitStatus::NothingToCommit) => ui::print_info("No changes to commit"),
        Some(CommitStatus::Disabled) => ui::print_info("Auto-commit is disabled; changes left uncommitted"),
        Some(CommitStatus::DryRun) | None => {}
    }
    if let Some(e) = &summary.push_error {
        ui::print_warning(&format!("Changes committed locally but not pushed: {}", e));
    }

    println!(
        "✅ Sync finished in {:.1}s: {} of {} utilities backed up",
        summary.duration.as_secs_f64(),
        summary.utilities_synced(),
        summary.reports.len()
    );
}

#[allow(clippy::too_many_arguments)]
async fn cmd_config(
    paths: &AppPaths,
    config_path: &std::path::Path,
    frequency: Option<u64>,
    enable: Option<String>,
    disable: Option<String>,
    reset: bool,
    fonts: bool,
) -> Result<()> {
    if reset {
        Config::default().save(config_path)?;
        ui::print_success("Configuration reset to defaults");
        return Ok(());
    }

    let no_flags = frequency.is_none() && enable.is_none() && disable.is_none() && !fonts;
    if no_flags {
        return wizard::run_config_menu(paths, config_path).await;
    }

    let mut config = Config::load_or_create(config_path)?;

    if let Some(seconds) = frequency {
        config.sync.frequency_seconds = seconds;
        ui::print_success(&format!("Sync frequency: {}", wizard::describe_frequency(seconds)));
        if agent::is_installed(paths) {
            ui::print_info("Run 'mac-sync-wizard install' to apply the new schedule to the LaunchAgent");
        }
    }
    if let Some(name) = enable {
        config.set_utility_enabled(&name, true)?;
        ui::print_success(&format!("Enabled {}", name));
    }
    if let Some(name) = disable {
        config.set_utility_enabled(&name, false)?;
        ui::print_success(&format!("Disabled {}", name));
    }
    if fonts {
        wizard::configure_fonts(&mut config, paths)?;
    }

    config.save(config_path)?;
    info!("Configuration updated");
    Ok(())
}

fn cmd_status(paths: &AppPaths, config_path: &std::path::Path, verbose: bool) -> Result<()> {
    let config = Config::load_or_create(config_path)?;
    let status = sync_status::status(&config, paths);

    ui::print_header("Mac Sync Wizard Status");
    ui::print_field(
        "Last sync",
        &status
            .last_sync
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Never".to_string()),
    );
    let next = match &status.next_sync {
        NextSync::ManualOnly => "Manual sync only".to_string(),
        NextSync::Pending => "At the next scheduled run".to_string(),
        NextSync::Due(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
    };
    ui::print_field("Next sync", &next);
    ui::print_field(
        "Frequency",
        &wizard::describe_frequency(config.sync.frequency_seconds),
    );
    ui::print_field(
        "Repository",
        status.repository.as_deref().unwrap_or("Not configured"),
    );
    ui::print_field(
        "Utilities",
        &format!("{} of {} enabled", status.enabled_utilities.len(), status.total_utilities),
    );
    ui::print_field(
        "LaunchAgent",
        if agent::is_installed(paths) { "Installed" } else { "Not installed" },
    );
    if status.is_syncing {
        ui::print_warning("Sync in progress");
    }

    if verbose {
        println!();
        let engine = BackupEngine::new(paths.clone(), true);
        let mut total = 0;
        for (name, utility) in config.enabled_utilities() {
            let size = engine.estimate_utility_size(name, utility);
            total += size.total;
            ui::print_field(name, &human_size(size.total));
        }
        ui::print_field("Total", &human_size(total));
    }
    Ok(())
}

fn cmd_install(paths: &AppPaths, config_path: &std::path::Path, uninstall: bool) -> Result<()> {
    if uninstall {
        if agent::uninstall(paths)? {
            ui::print_success("LaunchAgent removed");
        } else {
            ui::print_info("LaunchAgent was not installed");
        }
        return Ok(());
    }

    let config = Config::load_or_create(config_path)?;
    let plist = agent::install(paths, config.sync.frequency_seconds)?;
    ui::print_success(&format!(
        "LaunchAgent installed at {} ({})",
        plist.display(),
        wizard::describe_frequency(config.sync.frequency_seconds).to_lowercase()
    ));
    Ok(())
}

async fn cmd_restore(
    paths: &AppPaths,
    config_path: &std::path::Path,
    utility: Option<String>,
    yes: bool,
) -> Result<()> {
    let config = Config::load_or_create(config_path)?;
    if !config.is_repository_configured() {
        return Err(SyncError::NoRepository.into());
    }

    let health = HealthCheck::run(&config, paths).await;
    if !health.all_passed() {
        print_health_report(&health);
        return Err(SyncError::PreflightFailed(Box::new(health)).into());
    }

    let git = GitClient::new(paths.repo_dir.clone());
    if !git.is_repository() {
        return Err(SyncError::RepositoryNotInitialized(paths.repo_dir.clone()).into());
    }

    let _lock = SyncLock::acquire(&paths.lock_file)?;

    if let Err(e) = git
        .pull(&config.repository.branch, config.sync.pull_strategy)
        .await
    {
        ui::print_warning(&format!("Could not pull latest changes: {}", e));
        let proceed = yes
            || Confirm::new()
                .with_prompt("Continue restoring from the local copy?")
                .default(false)
                .interact()?;
        if !proceed {
            ui::print_info("Restore cancelled");
            return Ok(());
        }
    }

    let targets = match &utility {
        Some(name) => vec![(name.as_str(), config.utility(name)?)],
        None => config.enabled_utilities(),
    };
    if targets.is_empty() {
        ui::print_warning("No utilities enabled");
        return Ok(());
    }

    let names: Vec<&str> = targets.iter().map(|(name, _)| *name).collect();
    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Restore {}? Existing files are backed up first.",
                names.join(", ")
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            ui::print_info("Restore cancelled");
            return Ok(());
        }
    }

    let engine = BackupEngine::new(paths.clone(), false);
    let mut failed = 0;
    for (name, utility) in targets {
        match engine.restore_utility(name, utility) {
            Ok(report) => {
                if let Some(dir) = &report.safety_backup {
                    ui::print_info(&format!("{}: previous files saved to {}", name, dir.display()));
                }
                for warning in &report.warnings {
                    ui::print_warning(warning);
                }
                for failure in &report.failures {
                    ui::print_error(failure);
                }
                if report.succeeded() {
                    ui::print_success(&format!("Restored {} ({} items)", name, report.items_restored));
                } else {
                    failed += 1;
                }
            }
            Err(e) if class_of(&e) == ErrorClass::Advisory => ui::print_warning(&e.to_string()),
            Err(e) => {
                ui::print_error(&format!("{}: {:#}", name, e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} utilities failed to restore", failed));
    }
    Ok(())
}

/// Print health check report
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 Mac Sync Wizard Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
