//! LaunchAgent registration for scheduled background syncs

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::paths::AppPaths;

pub const AGENT_LABEL: &str = "com.mac-sync-wizard";

pub fn plist_path(paths: &AppPaths) -> PathBuf {
    paths.launch_agents_dir.join(format!("{}.plist", AGENT_LABEL))
}

pub fn is_installed(paths: &AppPaths) -> bool {
    plist_path(paths).exists()
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Property list that runs `<program> sync` every `frequency_seconds`
pub fn render_plist(program: &Path, frequency_seconds: u64, logs_dir: &Path) -> String {
    let program = xml_escape(&program.display().to_string());
    let stdout = xml_escape(&logs_dir.join("daemon.log").display().to_string());
    let stderr = xml_escape(&logs_dir.join("daemon_error.log").display().to_string());

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{program}</string>
        <string>sync</string>
    </array>
    <key>StartInterval</key>
    <integer>{frequency_seconds}</integer>
    <key>RunAtLoad</key>
    <true/>
    <key>StandardOutPath</key>
    <string>{stdout}</string>
    <key>StandardErrorPath</key>
    <string>{stderr}</string>
</dict>
</plist>
"#,
        label = AGENT_LABEL,
    )
}

fn launchctl(args: &[&str]) -> Result<std::process::Output> {
    let launchctl = which::which("launchctl").map_err(|_| anyhow!("launchctl not found (macOS only)"))?;
    Command::new(launchctl)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run launchctl {}", args.join(" ")))
}

/// Write the plist and load it, replacing an existing registration
pub fn install(paths: &AppPaths, frequency_seconds: u64) -> Result<PathBuf> {
    if frequency_seconds == 0 {
        return Err(anyhow!(
            "Sync frequency is 0 (manual only); set a frequency before installing the LaunchAgent"
        ));
    }

    let program = std::env::current_exe().context("Failed to locate the mac-sync-wizard executable")?;
    let plist = plist_path(paths);

    std::fs::create_dir_all(&paths.launch_agents_dir)
        .with_context(|| format!("Failed to create {}", paths.launch_agents_dir.display()))?;
    std::fs::create_dir_all(&paths.logs_dir)?;

    if plist.exists() {
        let plist_str = plist.display().to_string();
        match launchctl(&["unload", &plist_str]) {
            Ok(_) => debug!("Unloaded previous LaunchAgent"),
            Err(e) => warn!("Could not unload previous LaunchAgent: {:#}", e),
        }
    }

    std::fs::write(&plist, render_plist(&program, frequency_seconds, &paths.logs_dir))
        .with_context(|| format!("Failed to write {}", plist.display()))?;

    let output = launchctl(&["load", &plist.display().to_string()])?;
    if !output.status.success() {
        return Err(anyhow!(
            "launchctl load failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    info!("Installed LaunchAgent at {}", plist.display());
    Ok(plist)
}

/// Unload and remove the plist; `false` when nothing was installed
pub fn uninstall(paths: &AppPaths) -> Result<bool> {
    let plist = plist_path(paths);
    if !plist.exists() {
        return Ok(false);
    }

    match launchctl(&["unload", &plist.display().to_string()]) {
        Ok(output) if !output.status.success() => warn!(
            "launchctl unload failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ),
        Ok(_) => {}
        Err(e) => warn!("{:#}", e),
    }

    std::fs::remove_file(&plist).with_context(|| format!("Failed to remove {}", plist.display()))?;
    info!("Removed LaunchAgent {}", plist.display());
    Ok(true)
}
