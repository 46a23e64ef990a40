// ── Core error types ──
//
// Errors surfaced by duskswitch-core. Probe and sensor failures have their
// own small types so every place that coerces them to a safe default is
// explicit. Elevation failures never escape as errors: the channel folds
// them into `GrantResult`.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Elevation ────────────────────────────────────────────────────
    #[error("Elevation transport error: {0}")]
    Elevation(#[from] duskswitch_elevate::Error),

    // ── Collaborators ────────────────────────────────────────────────
    #[error("Preference store error: {message}")]
    Preferences { message: String },

    #[error("Monitoring service failed to start: {message}")]
    MonitoringStart { message: String },

    #[error("Display mode control failed: {message}")]
    Display { message: String },

    #[error(transparent)]
    Sensor(#[from] SensorError),

    // ── Flow ─────────────────────────────────────────────────────────
    #[error("Setup flow is no longer running")]
    FlowStopped,

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single environment probe could not be read.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    #[error("command `{command}` timed out")]
    Timeout { command: String },

    #[error("unexpected probe output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A sensor could not deliver a sample.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The device has no such sensor.
    #[error("{kind} sensor is not available")]
    Unavailable { kind: &'static str },

    #[error("{kind} sensor read failed: {reason}")]
    Read { kind: &'static str, reason: String },
}
