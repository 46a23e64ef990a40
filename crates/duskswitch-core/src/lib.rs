// duskswitch-core: Environment monitoring, the guided permission setup, the
// elevation channel and the adaptive theme decider.

pub mod channel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod platform;
pub mod setup;
pub mod theme;

// ── Primary re-exports ──────────────────────────────────────────────
pub use channel::{ElevationChannel, ReadinessTracker, host_instruction, manual_instruction};
pub use collaborators::{MemoryPreferences, MonitoringService, PreferenceStore};
pub use config::{ElevationConfig, MonitorConfig, ProximityScale, SensorConfig, SetupConfig};
pub use error::{CoreError, ProbeError, SensorError};
pub use monitor::{ConnectivityEvents, EnvironmentMonitor, EnvironmentProbes, UsbState};
pub use setup::{SetupAction, SetupFlow, SetupHandle, SetupMachine};
pub use theme::{
    DisplayModeControl, Evaluation, HysteresisThemeDecider, SensorKind, SensorSource,
    ThemeDecisionState, ThemeService,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    EnvironmentSnapshot, GrantResult, Notice, PreferenceUpdate, Preferences, SetupOutcome,
    SetupStep, SetupUiState, StepFlags, ThresholdModel, ThresholdPreset, ThresholdStep,
};
