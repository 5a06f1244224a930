//! Desktop notifications
//!
//! Delivered through `terminal-notifier` when installed, otherwise through
//! `osascript`. Delivery failures are logged and otherwise ignored.

use tracing::debug;

use crate::config::{NotificationConfig, NotificationLevel};

#[derive(Debug, Clone)]
pub struct Notifier {
    level: NotificationLevel,
    method: String,
}

impl Notifier {
    pub fn from_config(config: &NotificationConfig) -> Self {
        Self {
            level: config.level,
            method: config.method.clone(),
        }
    }

    /// A notifier that never sends anything
    pub fn silent() -> Self {
        Self {
            level: NotificationLevel::None,
            method: String::new(),
        }
    }

    pub fn should_send(&self, is_error: bool) -> bool {
        match self.level {
            NotificationLevel::All => true,
            NotificationLevel::ErrorsOnly => is_error,
            NotificationLevel::None => false,
        }
    }

    pub async fn notify(&self, title: &str, message: &str, is_error: bool) {
        if !self.should_send(is_error) {
            return;
        }

        let mut command = if self.method == "terminal-notifier" {
            match which::which("terminal-notifier") {
                Ok(path) => {
                    let mut cmd = tokio::process::Command::new(path);
                    cmd.args(["-title", title, "-message", message, "-group", "mac-sync-wizard"]);
                    Some(cmd)
                }
                Err(_) => None,
            }
        } else {
            None
        };

        if command.is_none() {
            command = which::which("osascript").ok().map(|path| {
                let mut cmd = tokio::process::Command::new(path);
                cmd.arg("-e").arg(applescript_notification(title, message));
                cmd
            });
        }

        let Some(mut command) = command else {
            debug!("No notification backend available");
            return;
        };

        match command.output().await {
            Ok(output) if output.status.success() => debug!("Notification sent: {}", title),
            Ok(output) => debug!(
                "Notification failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => debug!("Notification failed: {}", e),
        }
    }
}

fn applescript_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

pub fn applescript_notification(title: &str, message: &str) -> String {
    format!(
        "display notification {} with title {}",
        applescript_quote(message),
        applescript_quote(title)
    )
}
