// ── Adaptive theme ──

pub mod decider;
pub mod service;

pub use decider::{
    Band, COVERED_DISTANCE, DisplayModeControl, Evaluation, HYSTERESIS_RATIO,
    HysteresisThemeDecider, SensorKind, SensorSample, SensorSource, ThemeDecisionState, band,
    decide,
};
pub use service::ThemeService;
