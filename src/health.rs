//! Pre-flight checks
//!
//! Run before every sync and restore to verify the machine can reach the
//! repository and has room for the working tree.

use crate::config::Config;
use crate::paths::AppPaths;
use std::path::Path;
use std::time::Duration;

/// Free space required at the application directory
pub const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

const DEFAULT_HOST: &str = "github.com";
const NETWORK_TIMEOUT: Duration = Duration::from_secs(5);
const SSH_KEYS: [&str; 3] = ["id_rsa", "id_ed25519", "id_ecdsa"];

/// Result of system health checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub git: CheckResult,
    pub disk_space: CheckResult,
    pub network: CheckResult,
    /// SSH key presence, only required for SSH remotes
    pub credentials: CheckResult,
    /// Git LFS presence (warning only, used for fonts)
    pub git_lfs: CheckResult,
}

/// Result of an individual health check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

#[allow(dead_code)]
impl CheckResult {
    pub(crate) fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: true,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }
}

/// Host part of a remote URL, `None` for local `file://` remotes.
///
/// Handles `git@host:owner/repo.git`, `ssh://git@host:22/...` and
/// `https://user@host:8443/...`. An empty URL falls back to GitHub.
pub fn repo_host(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return Some(DEFAULT_HOST.to_string());
    }
    if url.starts_with("file://") {
        return None;
    }

    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => url.split_once(':').map(|(host, _)| host).unwrap_or(url),
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    let host = host.split(':').next().unwrap_or(host);

    (!host.is_empty()).then(|| host.to_string())
}

fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

impl HealthCheck {
    /// Run all health checks
    pub async fn run(config: &Config, paths: &AppPaths) -> Self {
        Self {
            git: Self::check_git(),
            disk_space: Self::check_disk_space(&paths.app_dir, MIN_FREE_BYTES),
            network: Self::check_network(&config.repository.url).await,
            credentials: Self::check_credentials(&config.repository.url, &paths.home),
            git_lfs: Self::check_git_lfs(),
        }
    }

    /// Check if all required checks passed (excludes warnings)
    pub fn all_passed(&self) -> bool {
        self.git.passed && self.disk_space.passed && self.network.passed && self.credentials.passed
        // Git LFS is optional, not included in required checks
    }

    /// Get list of failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, check)| check)
            .filter(|r| !r.passed && !r.is_warning)
            .collect()
    }

    /// Get list of warnings
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, check)| check)
            .filter(|r| r.is_warning)
            .collect()
    }

    /// One line per failed check, for error reporting
    pub fn failure_messages(&self) -> Vec<String> {
        self.all_checks()
            .into_iter()
            .filter(|(_, check)| !check.passed)
            .map(|(name, check)| format!("{}: {}", name, check.message))
            .collect()
    }

    /// Check git installation
    fn check_git() -> CheckResult {
        if which::which("git").is_err() {
            return CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: xcode-select --install",
            );
        }
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                CheckResult::ok_with_details("Git installed", version.trim().to_string())
            }
            Ok(_) => CheckResult::error("Git command failed"),
            Err(e) => CheckResult::error_with_details("Git could not be run", e.to_string()),
        }
    }

    /// Check free space on the filesystem holding `dir`
    fn check_disk_space(dir: &Path, required: u64) -> CheckResult {
        let Some(existing) = nearest_existing(dir) else {
            return CheckResult::error_with_details("Cannot check disk space", dir.display().to_string());
        };

        match nix::sys::statvfs::statvfs(existing) {
            Ok(stat) => {
                #[allow(clippy::unnecessary_cast)]
                let free = stat.blocks_available() as u64 * stat.fragment_size() as u64;
                let details = format!(
                    "{} free at {}",
                    crate::backup::human_size(free),
                    existing.display()
                );
                if free >= required {
                    CheckResult::ok_with_details("Sufficient disk space", details)
                } else {
                    CheckResult::error_with_details(
                        format!("Low disk space (need {})", crate::backup::human_size(required)),
                        details,
                    )
                }
            }
            Err(e) => CheckResult::error_with_details("Cannot check disk space", e.to_string()),
        }
    }

    /// Resolve the repository host as a basic reachability check
    async fn check_network(url: &str) -> CheckResult {
        let Some(host) = repo_host(url) else {
            return CheckResult::ok("Local repository, no network needed");
        };

        let lookup = tokio::net::lookup_host(format!("{}:443", host));
        match tokio::time::timeout(NETWORK_TIMEOUT, lookup).await {
            Ok(Ok(mut addrs)) => {
                if addrs.next().is_some() {
                    CheckResult::ok_with_details("Network reachable", host)
                } else {
                    CheckResult::error_with_details("No addresses found", host)
                }
            }
            Ok(Err(e)) => CheckResult::error_with_details(
                format!("Cannot resolve {}", host),
                e.to_string(),
            ),
            Err(_) => CheckResult::error_with_details(
                format!("Timed out resolving {}", host),
                "Check your network connection",
            ),
        }
    }

    /// SSH key check, only an error for `git@` and `ssh://` remotes
    fn check_credentials(url: &str, home: &Path) -> CheckResult {
        if !url.starts_with("git@") && !url.starts_with("ssh://") {
            return CheckResult::ok("No SSH key required");
        }

        let ssh_dir = home.join(".ssh");
        let found: Vec<&str> = SSH_KEYS
            .iter()
            .copied()
            .filter(|key| ssh_dir.join(key).exists())
            .collect();

        if found.is_empty() {
            CheckResult::error_with_details(
                "No SSH keys found",
                "Run: ssh-keygen -t ed25519 -C \"your_email@example.com\"",
            )
        } else {
            CheckResult::ok_with_details("SSH keys found", found.join(", "))
        }
    }

    /// Check Git LFS (warning only)
    fn check_git_lfs() -> CheckResult {
        match which::which("git-lfs") {
            Ok(path) => CheckResult::ok_with_details("Git LFS installed", path.display().to_string()),
            Err(_) => CheckResult::warning_with_details(
                "Git LFS not found",
                "Fonts are stored as regular files. Install with: brew install git-lfs",
            ),
        }
    }

    /// Get all checks as a slice for iteration
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 5] {
        [
            ("Git Installation", &self.git),
            ("Disk Space", &self.disk_space),
            ("Network", &self.network),
            ("SSH Credentials", &self.credentials),
            ("Git LFS", &self.git_lfs),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn healthy() -> HealthCheck {
        HealthCheck {
            git: CheckResult::ok("Git OK"),
            disk_space: CheckResult::ok("Disk OK"),
            network: CheckResult::ok("Network OK"),
            credentials: CheckResult::ok("Keys OK"),
            git_lfs: CheckResult::ok("LFS OK"),
        }
    }

    #[test]
    fn test_check_result_constructors() {
        let ok = CheckResult::ok_with_details("Test passed", "Some details");
        assert!(ok.passed && !ok.is_warning);
        assert_eq!(ok.details, Some("Some details".to_string()));

        let warning = CheckResult::warning("Test warning");
        assert!(warning.passed); // Warnings still "pass"
        assert!(warning.is_warning);

        let error = CheckResult::error_with_details("Test failed", "Error details");
        assert!(!error.passed && !error.is_warning);
    }

    #[test]
    fn test_repo_host() {
        assert_eq!(repo_host("git@github.com:user/dotfiles.git").as_deref(), Some("github.com"));
        assert_eq!(repo_host("https://gitlab.com/user/dotfiles.git").as_deref(), Some("gitlab.com"));
        assert_eq!(
            repo_host("https://me@git.example.com:8443/dotfiles.git").as_deref(),
            Some("git.example.com")
        );
        assert_eq!(repo_host("ssh://git@host.io:22/x.git").as_deref(), Some("host.io"));
        assert_eq!(repo_host("").as_deref(), Some("github.com"));
        assert_eq!(repo_host("file:///tmp/remote.git"), None);
    }

    #[test]
    fn test_credentials_only_required_for_ssh_urls() {
        let temp = TempDir::new().unwrap();

        let https = HealthCheck::check_credentials("https://github.com/u/r.git", temp.path());
        assert!(https.passed);

        let ssh = HealthCheck::check_credentials("git@github.com:u/r.git", temp.path());
        assert!(!ssh.passed);
        let ssh_scheme = HealthCheck::check_credentials("ssh://git@host.io:22/u/r.git", temp.path());
        assert!(!ssh_scheme.passed);

        std::fs::create_dir_all(temp.path().join(".ssh")).unwrap();
        std::fs::write(temp.path().join(".ssh/id_ed25519"), "key").unwrap();
        let ssh = HealthCheck::check_credentials("git@github.com:u/r.git", temp.path());
        assert!(ssh.passed);
        assert_eq!(ssh.details.as_deref(), Some("id_ed25519"));
    }

    #[test]
    fn test_disk_space_uses_existing_ancestor() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("not/created/yet");

        let result = HealthCheck::check_disk_space(&missing, 0);
        assert!(result.passed);

        let result = HealthCheck::check_disk_space(temp.path(), u64::MAX);
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_network_skipped_for_local_remote() {
        let result = HealthCheck::check_network("file:///tmp/remote.git").await;
        assert!(result.passed);
    }

    #[test]
    fn test_lfs_missing_does_not_fail() {
        let mut health = healthy();
        health.git_lfs = CheckResult::warning("Git LFS not found");
        assert!(health.all_passed());
        assert_eq!(health.warnings().len(), 1);
        assert!(health.failure_messages().is_empty());
    }

    #[test]
    fn test_failed_check_is_reported() {
        let mut health = healthy();
        health.network = CheckResult::error("Cannot resolve github.com");
        assert!(!health.all_passed());
        assert_eq!(health.errors().len(), 1);
        assert_eq!(
            health.failure_messages(),
            vec!["Network: Cannot resolve github.com".to_string()]
        );
    }

    #[test]
    fn test_all_checks_returns_all_five() {
        let health = healthy();
        let checks = health.all_checks();
        assert_eq!(checks.len(), 5);
        assert_eq!(checks[0].0, "Git Installation");
        assert_eq!(checks[4].0, "Git LFS");
    }
}
