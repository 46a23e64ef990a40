// ── Hysteresis theme decider ──
//
// Fuses one proximity sample and one light sample into a display-mode
// decision. The band around the threshold keeps the mode from flapping when
// the ambient light hovers near it.

use std::future::Future;

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use tracing::debug;

use crate::error::{CoreError, SensorError};

/// Half-width of the hysteresis band as a fraction of the threshold.
pub const HYSTERESIS_RATIO: f32 = 0.10;

/// Proximity readings below this distance mean the device is covered.
pub const COVERED_DISTANCE: f32 = 5.0;

// ── Decision ─────────────────────────────────────────────────────────

/// Lux band around a threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub lower: f32,
    pub upper: f32,
}

pub fn band(threshold_lux: f32) -> Band {
    let threshold = threshold_lux.max(0.0);
    Band {
        lower: threshold * (1.0 - HYSTERESIS_RATIO),
        upper: threshold * (1.0 + HYSTERESIS_RATIO),
    }
}

/// Whether the display should be dark after reading `lux`.
///
/// Dark stays dark up to and including the upper edge. Light only turns
/// dark strictly below the lower edge.
pub fn decide(is_dark: bool, lux: f32, threshold_lux: f32) -> bool {
    let Band { lower, upper } = band(threshold_lux);
    if is_dark { lux <= upper } else { lux < lower }
}

// ── Sensors and display ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Proximity,
    Light,
}

impl SensorKind {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub value: f32,
}

/// One-shot sensor access. Each read acquires the sensor, takes a single
/// sample and releases it again.
pub trait SensorSource: Send + Sync + 'static {
    fn read_once(
        &self,
        kind: SensorKind,
    ) -> impl Future<Output = Result<SensorSample, SensorError>> + Send;
}

/// System display mode.
pub trait DisplayModeControl: Send + Sync + 'static {
    fn is_dark(&self) -> impl Future<Output = Result<bool, CoreError>> + Send;
    fn set_dark(&self, dark: bool) -> impl Future<Output = Result<(), CoreError>> + Send;
}

// ── State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThemeDecisionState {
    pub configured_threshold_lux: f32,
    pub is_currently_dark: bool,
}

impl ThemeDecisionState {
    pub fn new(threshold_lux: f32, is_currently_dark: bool) -> Self {
        Self {
            configured_threshold_lux: threshold_lux.max(0.0),
            is_currently_dark,
        }
    }

    pub fn set_threshold(&mut self, threshold_lux: f32) {
        self.configured_threshold_lux = threshold_lux.max(0.0);
    }
}

/// What a single evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Evaluation {
    /// The proximity sensor reported the device covered; nothing changed.
    Covered { distance: f32 },
    /// The decision matched the current mode.
    Kept { lux: f32, dark: bool },
    /// The display mode was switched.
    Switched { lux: f32, dark: bool },
    /// Evaluation was not attempted (feature disabled).
    Skipped,
}

impl Evaluation {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Switched { .. })
    }
}

// ── HysteresisThemeDecider ───────────────────────────────────────────

enum Stage {
    AwaitingProximity,
    AwaitingLight,
}

pub struct HysteresisThemeDecider<S, D> {
    sensors: S,
    display: D,
}

impl<S: SensorSource, D: DisplayModeControl> HysteresisThemeDecider<S, D> {
    pub fn new(sensors: S, display: D) -> Self {
        Self { sensors, display }
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Run one proximity-then-light evaluation against `state`, switching the
    /// display and updating `state` only when the decision differs.
    pub async fn evaluate(&self, state: &mut ThemeDecisionState) -> Result<Evaluation, CoreError> {
        let mut stage = Stage::AwaitingProximity;
        loop {
            match stage {
                Stage::AwaitingProximity => {
                    match self.sensors.read_once(SensorKind::Proximity).await {
                        Ok(sample) if sample.value < COVERED_DISTANCE => {
                            debug!(distance = sample.value, "device covered, skipping");
                            return Ok(Evaluation::Covered {
                                distance: sample.value,
                            });
                        }
                        Ok(_) => {}
                        Err(SensorError::Unavailable { .. }) => {
                            debug!("no proximity sensor, using light only");
                        }
                        Err(e) => return Err(e.into()),
                    }
                    stage = Stage::AwaitingLight;
                }
                Stage::AwaitingLight => {
                    let lux = self.sensors.read_once(SensorKind::Light).await?.value;
                    let dark = decide(
                        state.is_currently_dark,
                        lux,
                        state.configured_threshold_lux,
                    );
                    debug!(
                        lux,
                        threshold = state.configured_threshold_lux,
                        was_dark = state.is_currently_dark,
                        dark,
                        "theme decision"
                    );

                    if dark == state.is_currently_dark {
                        return Ok(Evaluation::Kept { lux, dark });
                    }
                    self.display.set_dark(dark).await?;
                    state.is_currently_dark = dark;
                    return Ok(Evaluation::Switched { lux, dark });
                }
            }
        }
    }
}
