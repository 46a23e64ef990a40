// ── Runtime configuration ──
//
// These types describe how the core components run: cadences, timeouts and
// platform paths. They never touch disk. The CLI builds them from the
// duskswitch-config file and hands them in.

use std::path::PathBuf;
use std::time::Duration;

/// Package whose permission the setup flow acquires.
pub const DEFAULT_PACKAGE_ID: &str = "dev.duskswitch";

/// The protected permission needed to change the system display mode.
pub const TARGET_PERMISSION: &str = "android.permission.WRITE_SECURE_SETTINGS";

/// Default wait for the companion service reply.
pub const DEFAULT_BIND_TIMEOUT: Duration = Duration::from_secs(5);

/// Countdown length before an auto-advance, in ticks.
pub const AUTO_ADVANCE_TICKS: u32 = 2;

/// EnvironmentMonitor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Interval between snapshots.
    pub tick: Duration,
    /// Upper bound for a single probe command.
    pub probe_timeout: Duration,
    /// USB gadget state file (`CONFIGURED` when a host is attached).
    pub usb_state_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            usb_state_path: PathBuf::from("/sys/class/android_usb/android0/state"),
        }
    }
}

/// Guided setup flow tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupConfig {
    pub package_id: String,
    /// Countdown length in ticks.
    pub auto_advance_ticks: u32,
    /// Duration of one countdown tick.
    pub countdown_tick: Duration,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            package_id: DEFAULT_PACKAGE_ID.into(),
            auto_advance_ticks: AUTO_ADVANCE_TICKS,
            countdown_tick: Duration::from_secs(1),
        }
    }
}

/// ElevationChannel tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationConfig {
    /// Bound on bind + request + reply through the companion service.
    pub bind_timeout: Duration,
    /// Superuser binary used by the superuser strategy.
    pub superuser_binary: String,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            bind_timeout: DEFAULT_BIND_TIMEOUT,
            superuser_binary: duskswitch_elevate::superuser::DEFAULT_SUPERUSER_BINARY.into(),
        }
    }
}

/// How the proximity attribute reports nearness.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ProximityScale {
    /// IIO intensity: larger means nearer, 0 means nothing in range.
    /// Readings at or above `near_level` mean covered. `None` uses the
    /// driver's `in_proximity_nearlevel` beside the raw attribute.
    Intensity { near_level: Option<f32> },
    /// Already a distance; small means covered.
    #[default]
    Distance,
}

/// Where the platform sensors live.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    /// IIO attribute reporting illuminance in lux.
    pub light_path: PathBuf,
    /// IIO attribute reporting proximity. `None` means the device has no
    /// proximity sensor.
    pub proximity_path: Option<PathBuf>,
    pub proximity_scale: ProximityScale,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            light_path: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_illuminance_input"),
            proximity_path: Some(PathBuf::from(
                "/sys/bus/iio/devices/iio:device1/in_proximity_raw",
            )),
            proximity_scale: ProximityScale::Intensity { near_level: None },
        }
    }
}
