// ── System environment probes ──
//
// Reads the device settings, the package manager's permission dump and the
// USB gadget state file. Every read is bounded by the probe timeout.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{MonitorConfig, TARGET_PERMISSION};
use crate::error::ProbeError;
use crate::monitor::{EnvironmentProbes, UsbState};

use super::shell::run_command;

/// Commands the probes shell out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCommands {
    pub settings: Vec<String>,
    pub dumpsys: Vec<String>,
}

impl Default for ProbeCommands {
    fn default() -> Self {
        Self {
            settings: vec!["settings".into()],
            dumpsys: vec!["dumpsys".into()],
        }
    }
}

pub struct SystemProbes {
    commands: ProbeCommands,
    package_id: String,
    usb_state_path: PathBuf,
    timeout: Duration,
}

impl SystemProbes {
    pub fn new(package_id: impl Into<String>, config: &MonitorConfig) -> Self {
        Self {
            commands: ProbeCommands::default(),
            package_id: package_id.into(),
            usb_state_path: config.usb_state_path.clone(),
            timeout: config.probe_timeout,
        }
    }

    pub fn with_commands(mut self, commands: ProbeCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Current USB gadget state. A missing state file means no gadget
    /// driver, which reads as disconnected.
    pub async fn usb_state(&self) -> Result<UsbState, ProbeError> {
        match tokio::fs::read_to_string(&self.usb_state_path).await {
            Ok(contents) => Ok(parse_usb_state(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsbState::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn global_setting(&self, key: &str) -> Result<bool, ProbeError> {
        let out = run_command(&self.commands.settings, &["get", "global", key], self.timeout).await?;
        parse_setting(&out)
    }
}

impl EnvironmentProbes for SystemProbes {
    async fn developer_mode(&self) -> Result<bool, ProbeError> {
        self.global_setting("development_settings_enabled").await
    }

    async fn debug_bridge(&self) -> Result<bool, ProbeError> {
        self.global_setting("adb_enabled").await
    }

    async fn permission_granted(&self) -> Result<bool, ProbeError> {
        let out = run_command(
            &self.commands.dumpsys,
            &["package", &self.package_id],
            self.timeout,
        )
        .await?;
        Ok(parse_permission_granted(&out, TARGET_PERMISSION))
    }

    async fn device_enumerated(&self) -> Result<bool, ProbeError> {
        Ok(self.usb_state().await?.is_connected())
    }
}

// ── Parsers ──────────────────────────────────────────────────────────

/// `settings get` prints `1`/`0`, or `null` for a key never written.
pub fn parse_setting(output: &str) -> Result<bool, ProbeError> {
    match output.trim() {
        "1" => Ok(true),
        "0" | "null" | "" => Ok(false),
        other => other
            .parse::<i64>()
            .map(|v| v != 0)
            .map_err(|_| ProbeError::Parse(format!("setting value {other:?}"))),
    }
}

/// Scan a package dump for `<permission>: granted=true`.
pub fn parse_permission_granted(dump: &str, permission: &str) -> bool {
    dump.lines().any(|line| {
        line.trim()
            .strip_prefix(permission)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|rest| rest.split_whitespace().any(|f| f == "granted=true"))
    })
}

/// Map the gadget state file (`DISCONNECTED`, `CONNECTED`, `CONFIGURED`).
pub fn parse_usb_state(contents: &str) -> UsbState {
    match contents.trim() {
        "CONFIGURED" => UsbState {
            connected: true,
            configured: true,
            ..UsbState::default()
        },
        "CONNECTED" => UsbState {
            connected: true,
            ..UsbState::default()
        },
        _ => UsbState::default(),
    }
}
