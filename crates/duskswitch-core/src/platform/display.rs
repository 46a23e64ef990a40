// ── Display mode control ──

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use crate::error::{CoreError, ProbeError};
use crate::theme::DisplayModeControl;

use super::shell::run_command;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Switches the system night mode through `cmd uimode night`.
#[derive(Debug, Clone)]
pub struct UiModeDisplay {
    command: Vec<String>,
    timeout: Duration,
}

impl Default for UiModeDisplay {
    fn default() -> Self {
        Self::new(vec!["cmd".into(), "uimode".into()])
    }
}

impl UiModeDisplay {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    async fn night(&self, args: &[&str]) -> Result<String, CoreError> {
        let mut full = vec!["night"];
        full.extend_from_slice(args);
        run_command(&self.command, &full, self.timeout)
            .await
            .map_err(display_error)
    }
}

impl DisplayModeControl for UiModeDisplay {
    async fn is_dark(&self) -> Result<bool, CoreError> {
        let out = self.night(&[]).await?;
        parse_night_mode(&out).ok_or_else(|| CoreError::Display {
            message: format!("unexpected night mode output {out:?}"),
        })
    }

    async fn set_dark(&self, dark: bool) -> Result<(), CoreError> {
        self.night(&[if dark { "yes" } else { "no" }]).await?;
        info!(dark, "display mode switched");
        Ok(())
    }
}

fn display_error(e: ProbeError) -> CoreError {
    CoreError::Display {
        message: e.to_string(),
    }
}

/// `Night mode: yes|no|auto|custom`. Only `yes` is dark.
pub fn parse_night_mode(output: &str) -> Option<bool> {
    let value = output.trim().strip_prefix("Night mode:")?.trim();
    match value {
        "yes" => Some(true),
        "no" | "auto" | "custom" => Some(false),
        _ => None,
    }
}

/// In-memory display, for dry runs.
#[derive(Debug, Default)]
pub struct MemoryDisplay {
    dark: AtomicBool,
}

impl MemoryDisplay {
    pub fn new(dark: bool) -> Self {
        Self {
            dark: AtomicBool::new(dark),
        }
    }
}

impl DisplayModeControl for MemoryDisplay {
    async fn is_dark(&self) -> Result<bool, CoreError> {
        Ok(self.dark.load(Ordering::Acquire))
    }

    async fn set_dark(&self, dark: bool) -> Result<(), CoreError> {
        self.dark.store(dark, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn night_mode_output() {
        assert_eq!(parse_night_mode("Night mode: yes\n"), Some(true));
        assert_eq!(parse_night_mode("Night mode: no"), Some(false));
        assert_eq!(parse_night_mode("Night mode: auto"), Some(false));
        assert_eq!(parse_night_mode("error"), None);
    }

    #[tokio::test]
    async fn drives_the_uimode_command() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("mode");
        let script = format!(
            "if [ -n \"$2\" ]; then echo \"$2\" > {0}; else echo \"Night mode: $(cat {0})\"; fi",
            state.display()
        );
        let display = UiModeDisplay::new(vec!["sh".into(), "-c".into(), script, "uimode".into()]);

        display.set_dark(true).await.unwrap();
        assert!(display.is_dark().await.unwrap());
        display.set_dark(false).await.unwrap();
        assert!(!display.is_dark().await.unwrap());
    }

    #[tokio::test]
    async fn command_failure_is_a_display_error() {
        let display = UiModeDisplay::new(vec!["sh".into(), "-c".into(), "exit 1".into()]);
        assert!(matches!(
            display.set_dark(true).await,
            Err(CoreError::Display { .. })
        ));
    }
}
