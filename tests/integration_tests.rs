use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::process::{Command, Output};

/// Integration tests for mac-sync-wizard CLI commands
/// These tests run the actual binary against a temporary home directory

fn run_cli(home: &TempDir, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mac-sync-wizard"))
        .args(args)
        .env("HOME", home.path())
        .env("MAC_SYNC_WIZARD_HOME", home.child(".mac-sync-wizard").path())
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

fn config_json(home: &TempDir) -> serde_json::Value {
    let path = home.child(".mac-sync-wizard/config/sync_config.json");
    let content = std::fs::read_to_string(path.path()).expect("config written");
    serde_json::from_str(&content).expect("valid json")
}

#[test]
fn test_cli_help() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    // Verify help contains expected commands
    for command in ["setup", "sync", "config", "status", "install", "restore", "doctor"] {
        assert!(stdout.contains(command), "missing {} in help", command);
    }
}

#[test]
fn test_help_subcommand_and_no_arguments() {
    let home = TempDir::new().unwrap();

    let help = run_cli(&home, &["help"]);
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("restore"));

    let bare = run_cli(&home, &[]);
    assert!(bare.status.success());
    assert!(String::from_utf8_lossy(&bare.stdout).contains("Usage"));
}

#[test]
fn test_cli_version() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["--version"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("mac-sync-wizard"));
}

#[test]
fn test_status_on_fresh_install() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["status"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Never"));
    assert!(stdout.contains("Not configured"));

    // Missing configuration is created with defaults
    home.child(".mac-sync-wizard/config/sync_config.json")
        .assert(predicate::path::is_file());
    home.child(".mac-sync-wizard/logs/mac-sync-wizard.log")
        .assert(predicate::path::exists());
}

#[test]
fn test_config_flags_update_file() {
    let home = TempDir::new().unwrap();

    assert!(run_cli(&home, &["config", "--frequency", "3600"]).status.success());
    assert!(run_cli(&home, &["config", "--disable", "git"]).status.success());
    assert!(run_cli(&home, &["config", "--enable", "arc"]).status.success());

    let config = config_json(&home);
    assert_eq!(config["sync"]["frequency_seconds"], 3600);
    assert_eq!(config["utilities"]["git"]["enabled"], false);
    assert_eq!(config["utilities"]["arc"]["enabled"], true);

    assert!(run_cli(&home, &["config", "--reset"]).status.success());
    assert_eq!(config_json(&home)["sync"]["frequency_seconds"], 21600);
}

#[test]
fn test_config_preserves_unknown_keys() {
    let home = TempDir::new().unwrap();
    home.child(".mac-sync-wizard/config/sync_config.json")
        .write_str(r#"{"custom_key": {"nested": 1}, "sync": {"frequency": 1800}}"#)
        .unwrap();

    assert!(run_cli(&home, &["config", "--enable", "logi"]).status.success());

    let config = config_json(&home);
    assert_eq!(config["custom_key"]["nested"], 1);
    assert_eq!(config["sync"]["frequency_seconds"], 1800);
}

#[test]
fn test_unknown_utility_fails() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["config", "--enable", "no-such-app"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown utility: no-such-app"));
}

#[test]
fn test_sync_without_repository_exit_code() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["sync", "--skip-preflight"]);

    assert_eq!(output.status.code(), Some(4));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No repository configured"));
}

#[test]
fn test_failed_preflight_prints_every_check() {
    let home = TempDir::new().unwrap();
    home.child(".mac-sync-wizard/config/sync_config.json")
        .write_str(r#"{"repository": {"url": "git@localhost:me/settings.git"}}"#)
        .unwrap();

    let output = run_cli(&home, &["sync"]);

    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8_lossy(&output.stdout);
    for check in ["Git Installation:", "Disk Space:", "Network:", "SSH Credentials:", "Git LFS:"] {
        assert!(stdout.contains(check), "missing {} in report", check);
    }
    assert!(stdout.contains("No SSH keys found"));
    assert!(stdout.contains("Some checks failed"));
    home.child(".mac-sync-wizard/sync.lock").assert(predicate::path::missing());
}

#[test]
fn test_sync_while_locked_exit_code() {
    let home = TempDir::new().unwrap();
    let lock = home.child(".mac-sync-wizard/sync.lock");
    lock.write_str("busy").unwrap();

    let output = run_cli(&home, &["sync", "--skip-preflight"]);

    assert_eq!(output.status.code(), Some(6));
    assert!(String::from_utf8_lossy(&output.stderr).contains("already in progress"));
    lock.assert("busy");
}

#[test]
fn test_restore_without_repository_exit_code() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["restore", "--yes"]);

    assert_eq!(output.status.code(), Some(4));
}

#[test]
fn test_uninstall_without_agent() {
    let home = TempDir::new().unwrap();
    let output = run_cli(&home, &["install", "--uninstall"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("not installed"));
}
