//! Shell alias extraction for the `shell` utility
//!
//! Collects `alias` lines from the usual rc files into a synced
//! `aliases.sh`, next to a machine-local `local.sh` that git ignores and a
//! `load.sh` that sources both.

use anyhow::{Context, Result};
use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backup::copy_file_preserving;
use crate::config::Config;
use crate::paths::AppPaths;

pub const SHELL_UTILITY: &str = "shell";

const RC_FILES: [&str; 5] = [".bashrc", ".bash_profile", ".zshrc", ".aliases", ".bash_aliases"];

const ALIASES_HEADER: &str = "#!/bin/bash
# Synced shell aliases from mac-sync-wizard
# This file is synced across your machines

";

const LOCAL_TEMPLATE: &str = "#!/bin/bash
# Machine-specific aliases and settings
# This file is NOT synced

# alias work-vpn='sudo openconnect vpn.company.com'
# export WORK_DIR=\"$HOME/work\"
";

const GITIGNORE: &str = "# Machine-specific, not synced
local.sh
*.local

*.tmp
*.swp
*~
.DS_Store
";

const LOADER: &str = "#!/bin/bash
# Source this file from .bashrc or .zshrc
SHELL_CONFIG_DIR=\"$(dirname \"${BASH_SOURCE[0]:-$0}\")\"

[ -f \"$SHELL_CONFIG_DIR/aliases.sh\" ] && source \"$SHELL_CONFIG_DIR/aliases.sh\"
[ -f \"$SHELL_CONFIG_DIR/local.sh\" ] && source \"$SHELL_CONFIG_DIR/local.sh\"
";

/// Directory the `shell` utility syncs, from its first configured path
pub fn shell_dir(config: &Config, paths: &AppPaths) -> PathBuf {
    config
        .utilities
        .get(SHELL_UTILITY)
        .and_then(|utility| utility.paths.first())
        .map(|raw| paths.expand(raw.trim_end_matches('/')))
        .unwrap_or_else(|| paths.app_dir.join("shell"))
}

/// Existing shell rc files under `home`
pub fn find_rc_files(home: &Path) -> Vec<PathBuf> {
    RC_FILES
        .iter()
        .map(|name| home.join(name))
        .filter(|path| path.is_file())
        .collect()
}

/// `alias` definitions from the given rc files, in file order
pub fn extract_aliases(rc_files: &[PathBuf]) -> Vec<String> {
    let mut aliases = Vec::new();
    for rc in rc_files {
        match std::fs::read_to_string(rc) {
            Ok(content) => aliases.extend(
                content
                    .lines()
                    .filter(|line| line.trim_start().starts_with("alias "))
                    .map(|line| line.trim_end().to_string()),
            ),
            Err(e) => warn!("Failed to read {}: {}", rc.display(), e),
        }
    }
    aliases
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to make {} executable", path.display()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn write_script(path: &Path, content: &str, executable: bool) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    if executable {
        make_executable(path)?;
    }
    Ok(())
}

/// Write `aliases.sh`, `.gitignore` and `load.sh` into `dir`.
///
/// An existing `local.sh` is left alone.
pub fn write_shell_files(dir: &Path, aliases: &[String]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut content = String::from(ALIASES_HEADER);
    for alias in aliases {
        content.push_str(alias);
        content.push('\n');
    }
    write_script(&dir.join("aliases.sh"), &content, true)?;

    let local = dir.join("local.sh");
    if !local.exists() {
        write_script(&local, LOCAL_TEMPLATE, false)?;
    }
    write_script(&dir.join(".gitignore"), GITIGNORE, false)?;
    write_script(&dir.join("load.sh"), LOADER, true)?;

    info!("Wrote {} aliases to {}", aliases.len(), dir.display());
    Ok(())
}

/// rc file of the login shell named by `$SHELL`
pub fn rc_for_shell(home: &Path, shell: &str) -> Option<PathBuf> {
    match Path::new(shell).file_name()?.to_str()? {
        "zsh" => Some(home.join(".zshrc")),
        "bash" => Some(home.join(".bashrc")),
        _ => None,
    }
}

fn loader_path_text(dir: &Path, home: &Path) -> String {
    let load = dir.join("load.sh");
    match load.strip_prefix(home) {
        Ok(rel) => format!("$HOME/{}", rel.display()),
        Err(_) => load.display().to_string(),
    }
}

/// Line that sources `load.sh` from an rc file
pub fn loader_line(dir: &Path, home: &Path) -> String {
    let load = loader_path_text(dir, home);
    format!("[ -f \"{load}\" ] && source \"{load}\"")
}

pub fn has_loader(rc: &Path, dir: &Path, home: &Path) -> Result<bool> {
    let content = std::fs::read_to_string(rc).with_context(|| format!("Failed to read {}", rc.display()))?;
    Ok(content.contains(&loader_path_text(dir, home)))
}

/// Append the loader line to `rc` after saving a timestamped copy.
///
/// Returns the copy's path.
pub fn install_loader(rc: &Path, dir: &Path, home: &Path) -> Result<PathBuf> {
    let mut copy = rc.as_os_str().to_owned();
    copy.push(format!(".backup.{}", Local::now().format("%Y%m%d_%H%M%S")));
    let copy = PathBuf::from(copy);
    copy_file_preserving(rc, &copy)?;

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(rc)
        .with_context(|| format!("Failed to open {}", rc.display()))?;
    writeln!(file, "\n# mac-sync-wizard shell loader\n{}", loader_line(dir, home))
        .with_context(|| format!("Failed to update {}", rc.display()))?;

    info!("Added shell loader to {}", rc.display());
    Ok(copy)
}
