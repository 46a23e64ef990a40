//! Shared configuration for the duskswitch binary.
//!
//! A TOML file merged with `DUSKSWITCH_*` environment overrides, plus the
//! translation into the runtime configs of `duskswitch-core` and
//! `duskswitch-elevate`. User preferences live in a separate file managed by
//! [`FilePreferences`].

mod preferences;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use duskswitch_core::config::DEFAULT_PACKAGE_ID;
use duskswitch_core::{ElevationConfig, MonitorConfig, ProximityScale, SensorConfig, SetupConfig};
use duskswitch_elevate::SocketHostConfig;

pub use preferences::FilePreferences;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Package whose permission setup acquires.
    pub package_id: String,

    /// Where preferences are stored. Defaults to the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences_path: Option<PathBuf>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub companion: Companion,

    #[serde(default)]
    pub superuser: Superuser,

    #[serde(default)]
    pub monitor: Monitor,

    #[serde(default)]
    pub sensors: Sensors,

    #[serde(default)]
    pub display: Display,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            package_id: DEFAULT_PACKAGE_ID.into(),
            preferences_path: None,
            defaults: Defaults::default(),
            companion: Companion::default(),
            superuser: Superuser::default(),
            monitor: Monitor::default(),
            sensors: Sensors::default(),
            display: Display::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

/// Companion elevation service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Companion {
    /// Socket path. Defaults to `companion.sock` in the runtime directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    /// Authorization marker. Defaults to `companion.authorized` in the data
    /// directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker_path: Option<PathBuf>,

    #[serde(default = "default_bind_timeout_ms")]
    pub bind_timeout_ms: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_authorization_wait_secs")]
    pub authorization_wait_secs: u64,

    /// Peer uids allowed to connect (besides our own). Empty allows any.
    #[serde(default)]
    pub allowed_uids: Vec<u32>,
}

impl Default for Companion {
    fn default() -> Self {
        Self {
            socket_path: None,
            marker_path: None,
            bind_timeout_ms: default_bind_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            authorization_wait_secs: default_authorization_wait_secs(),
            allowed_uids: Vec::new(),
        }
    }
}

fn default_bind_timeout_ms() -> u64 {
    5_000
}
fn default_probe_interval_ms() -> u64 {
    2_000
}
fn default_authorization_wait_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Superuser {
    #[serde(default = "default_superuser_binary")]
    pub binary: String,
}

impl Default for Superuser {
    fn default() -> Self {
        Self {
            binary: default_superuser_binary(),
        }
    }
}

fn default_superuser_binary() -> String {
    duskswitch_elevate::superuser::DEFAULT_SUPERUSER_BINARY.into()
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Monitor {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_auto_advance_ticks")]
    pub auto_advance_ticks: u32,

    #[serde(default = "default_usb_state_path")]
    pub usb_state_path: PathBuf,
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            auto_advance_ticks: default_auto_advance_ticks(),
            usb_state_path: default_usb_state_path(),
        }
    }
}

fn default_tick_ms() -> u64 {
    1_000
}
fn default_probe_timeout_ms() -> u64 {
    2_000
}
fn default_auto_advance_ticks() -> u32 {
    duskswitch_core::config::AUTO_ADVANCE_TICKS
}
fn default_usb_state_path() -> PathBuf {
    MonitorConfig::default().usb_state_path
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Sensors {
    #[serde(default = "default_light_path")]
    pub light_path: PathBuf,

    #[serde(default = "default_proximity_path")]
    pub proximity_path: PathBuf,

    /// Set to false on devices without a proximity sensor.
    #[serde(default = "default_true")]
    pub proximity_enabled: bool,

    #[serde(default)]
    pub proximity_unit: ProximityUnit,

    /// Intensity at or above which the device counts as covered. Unset
    /// uses the driver's `in_proximity_nearlevel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_near_level: Option<f32>,
}

impl Default for Sensors {
    fn default() -> Self {
        Self {
            light_path: default_light_path(),
            proximity_path: default_proximity_path(),
            proximity_enabled: true,
            proximity_unit: ProximityUnit::default(),
            proximity_near_level: None,
        }
    }
}

/// What `proximity_path` reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProximityUnit {
    /// Raw IIO intensity, larger is nearer.
    #[default]
    Intensity,
    /// A distance, smaller is nearer.
    Distance,
}

fn default_light_path() -> PathBuf {
    SensorConfig::default().light_path
}
fn default_proximity_path() -> PathBuf {
    SensorConfig::default().proximity_path.unwrap_or_default()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Display {
    /// Program and leading arguments for the night mode command.
    #[serde(default = "default_uimode_command")]
    pub uimode_command: Vec<String>,
}

impl Default for Display {
    fn default() -> Self {
        Self {
            uimode_command: default_uimode_command(),
        }
    }
}

fn default_uimode_command() -> Vec<String> {
    vec!["cmd".into(), "uimode".into()]
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "duskswitch", "duskswitch")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("duskswitch");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn data_dir() -> PathBuf {
    project_dirs().map_or_else(dirs_fallback, |dirs| dirs.data_local_dir().to_path_buf())
}

fn runtime_dir() -> PathBuf {
    project_dirs()
        .and_then(|dirs| dirs.runtime_dir().map(Path::to_path_buf))
        .unwrap_or_else(data_dir)
}

/// Directory for log files written by the long-running commands.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("DUSKSWITCH_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation into runtime configs ────────────────────────────────

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.package_id.trim().is_empty() {
            return Err(invalid("package_id", "must not be empty"));
        }
        if self.monitor.tick_ms == 0 {
            return Err(invalid("monitor.tick_ms", "must be greater than zero"));
        }
        if self.companion.bind_timeout_ms == 0 {
            return Err(invalid("companion.bind_timeout_ms", "must be greater than zero"));
        }
        if self.display.uimode_command.is_empty() {
            return Err(invalid("display.uimode_command", "must name a program"));
        }
        Ok(())
    }

    pub fn socket_path(&self) -> PathBuf {
        self.companion
            .socket_path
            .clone()
            .unwrap_or_else(|| runtime_dir().join("companion.sock"))
    }

    pub fn marker_path(&self) -> PathBuf {
        self.companion
            .marker_path
            .clone()
            .unwrap_or_else(|| data_dir().join("companion.authorized"))
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.preferences_path
            .clone()
            .unwrap_or_else(|| data_dir().join("preferences.toml"))
    }

    /// Pid file of the running theme daemon.
    pub fn pid_path(&self) -> PathBuf {
        runtime_dir().join("daemon.pid")
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            tick: Duration::from_millis(self.monitor.tick_ms),
            probe_timeout: Duration::from_millis(self.monitor.probe_timeout_ms),
            usb_state_path: self.monitor.usb_state_path.clone(),
        }
    }

    /// The countdown ticks at the monitor cadence.
    pub fn setup_config(&self) -> SetupConfig {
        SetupConfig {
            package_id: self.package_id.clone(),
            auto_advance_ticks: self.monitor.auto_advance_ticks,
            countdown_tick: Duration::from_millis(self.monitor.tick_ms),
        }
    }

    pub fn elevation_config(&self) -> ElevationConfig {
        ElevationConfig {
            bind_timeout: Duration::from_millis(self.companion.bind_timeout_ms),
            superuser_binary: self.superuser.binary.clone(),
        }
    }

    pub fn sensor_config(&self) -> SensorConfig {
        SensorConfig {
            light_path: self.sensors.light_path.clone(),
            proximity_path: self
                .sensors
                .proximity_enabled
                .then(|| self.sensors.proximity_path.clone()),
            proximity_scale: match self.sensors.proximity_unit {
                ProximityUnit::Intensity => ProximityScale::Intensity {
                    near_level: self.sensors.proximity_near_level,
                },
                ProximityUnit::Distance => ProximityScale::Distance,
            },
        }
    }

    pub fn socket_host_config(&self) -> SocketHostConfig {
        SocketHostConfig {
            probe_interval: Duration::from_millis(self.companion.probe_interval_ms),
            authorization_wait: Duration::from_secs(self.companion.authorization_wait_secs),
            ..SocketHostConfig::new(self.socket_path(), self.marker_path())
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let config = load_config_from(&jail.directory().join("absent.toml")).unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.monitor_config(), MonitorConfig::default());
            assert_eq!(config.setup_config(), SetupConfig::default());
            assert_eq!(config.elevation_config(), ElevationConfig::default());
            Ok(())
        });
    }

    #[test]
    fn file_and_environment_merge() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                package_id = "org.example.night"

                [companion]
                socket_path = "/run/duskswitch/companion.sock"
                bind_timeout_ms = 1500

                [monitor]
                auto_advance_ticks = 3
                "#,
            )?;
            jail.set_env("DUSKSWITCH_MONITOR__TICK_MS", "250");
            jail.set_env("DUSKSWITCH_SUPERUSER__BINARY", "/system/xbin/su");

            let config = load_config_from(&jail.directory().join("config.toml")).unwrap();
            assert_eq!(config.package_id, "org.example.night");
            assert_eq!(config.monitor.tick_ms, 250);
            assert_eq!(config.superuser.binary, "/system/xbin/su");

            let setup = config.setup_config();
            assert_eq!(setup.auto_advance_ticks, 3);
            assert_eq!(setup.countdown_tick, Duration::from_millis(250));

            let host = config.socket_host_config();
            assert_eq!(host.socket_path, PathBuf::from("/run/duskswitch/companion.sock"));
            assert_eq!(
                config.elevation_config().bind_timeout,
                Duration::from_millis(1_500)
            );
            Ok(())
        });
    }

    #[test]
    fn zero_tick_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[monitor]\ntick_ms = 0\n")?;
            let err = load_config_from(&jail.directory().join("config.toml")).unwrap_err();
            assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "monitor.tick_ms"));
            Ok(())
        });
    }

    #[test]
    fn save_then_load_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.sensors.proximity_enabled = false;
        config.companion.allowed_uids = vec![2000];

        save_config_to(&config, &path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(!written.contains("socket_path"));

        let reloaded: Config = toml::from_str(&written).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.sensor_config().proximity_path, None);
    }

    #[test]
    fn proximity_defaults_to_intensity_with_driver_near_level() {
        let scale = Config::default().sensor_config().proximity_scale;
        assert_eq!(scale, ProximityScale::Intensity { near_level: None });
    }

    #[test]
    fn proximity_unit_and_near_level_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                "[sensors]\nproximity_near_level = 80.0\n",
            )?;
            let config = load_config_from(&jail.directory().join("config.toml")).unwrap();
            assert_eq!(
                config.sensor_config().proximity_scale,
                ProximityScale::Intensity {
                    near_level: Some(80.0)
                }
            );

            jail.set_env("DUSKSWITCH_SENSORS__PROXIMITY_UNIT", "distance");
            let config = load_config_from(&jail.directory().join("config.toml")).unwrap();
            assert_eq!(config.sensor_config().proximity_scale, ProximityScale::Distance);
            Ok(())
        });
    }
}
