//! Runtime wiring shared by the command handlers.
//!
//! Loads the configuration once and builds the core components from it on
//! demand. Nothing here talks to the device until a builder is called.

use std::path::PathBuf;
use std::sync::Arc;

use duskswitch_config::{Config, FilePreferences};
use duskswitch_core::platform::{IioSensors, SystemProbes, UiModeDisplay};
use duskswitch_core::{
    ConnectivityEvents, ElevationChannel, EnvironmentMonitor, HysteresisThemeDecider,
    PreferenceStore, ThemeService,
};
use duskswitch_elevate::SocketHost;
use tracing::debug;

use crate::cli::{ColorMode, GlobalOpts};
use crate::daemon_process::DaemonProcess;
use crate::error::CliError;
use crate::output;

pub type SystemMonitor = EnvironmentMonitor<SystemProbes>;
pub type SystemChannel = ElevationChannel<SocketHost>;
pub type SystemThemeService = ThemeService<IioSensors, UiModeDisplay>;

pub struct Context {
    pub config: Config,
    /// `--config`, passed on to processes this one spawns.
    pub config_file: Option<PathBuf>,
    pub color: bool,
    pub quiet: bool,
}

impl Context {
    /// Load the config named by `--config`, or the default location.
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let config = match &global.config {
            Some(path) => duskswitch_config::load_config_from(path)?,
            None => duskswitch_config::load_config()?,
        };
        debug!(package = %config.package_id, "configuration loaded");
        // `--color auto` defers to the config file's default.
        let color = match (&global.color, config.defaults.color.as_str()) {
            (ColorMode::Auto, "never") => false,
            (ColorMode::Auto, "always") => true,
            (mode, _) => output::should_color(mode),
        };
        Ok(Self {
            config,
            config_file: global.config.clone(),
            color,
            quiet: global.quiet,
        })
    }

    pub fn package_id(&self) -> &str {
        &self.config.package_id
    }

    pub fn preferences(&self) -> Result<Arc<FilePreferences>, CliError> {
        let store = FilePreferences::open(self.config.preferences_path())?;
        Ok(Arc::new(store))
    }

    pub fn preference_store(&self) -> Result<Arc<dyn PreferenceStore>, CliError> {
        let store: Arc<dyn PreferenceStore> = self.preferences()?;
        Ok(store)
    }

    /// Socket host with its availability already probed, so a channel
    /// built on it sees the current state.
    pub async fn socket_host(&self) -> Arc<SocketHost> {
        let host = Arc::new(SocketHost::new(self.config.socket_host_config()));
        host.watch_availability();
        let alive = host.probe_now().await;
        debug!(alive, socket = %self.config.socket_path().display(), "companion probed");
        host
    }

    pub async fn channel(&self) -> Arc<SystemChannel> {
        let host = self.socket_host().await;
        Arc::new(ElevationChannel::new(host, &self.config.elevation_config()))
    }

    pub fn probes(&self) -> SystemProbes {
        SystemProbes::new(self.config.package_id.clone(), &self.config.monitor_config())
    }

    pub fn monitor(&self) -> SystemMonitor {
        EnvironmentMonitor::new(
            self.probes(),
            self.config.monitor_config(),
            ConnectivityEvents::new(),
        )
    }

    pub fn theme_service(
        &self,
        preferences: Arc<dyn PreferenceStore>,
    ) -> SystemThemeService {
        let decider = HysteresisThemeDecider::new(
            IioSensors::new(&self.config.sensor_config()),
            UiModeDisplay::new(self.config.display.uimode_command.clone()),
        );
        ThemeService::new(decider, preferences)
    }

    pub fn daemon(&self) -> DaemonProcess {
        DaemonProcess::new(self.config.pid_path())
            .with_config_file(self.config_file.clone())
            .with_log_dir(duskswitch_config::log_dir())
    }
}
