// ── User preferences ──

use serde::{Deserialize, Serialize};

use super::threshold::ThresholdPreset;

/// Persisted user preferences read by the setup flow and the theme service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Adaptive theme switching is on.
    pub enabled: bool,
    /// Configured threshold (lux). Negative values are clamped at use.
    pub threshold_lux: f32,
    /// A user-entered value that is not one of the presets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_threshold_lux: Option<f32>,
    /// The permission setup flow finished.
    pub setup_completed: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_lux: ThresholdPreset::default().lux(),
            custom_threshold_lux: None,
            setup_completed: false,
        }
    }
}

/// A single preference change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PreferenceUpdate {
    Enabled(bool),
    SetupCompleted(bool),
    /// Pick a preset. Clears any custom value.
    Preset(ThresholdPreset),
    /// Store a custom threshold and use it.
    CustomThreshold(f32),
    /// Forget the custom value, keeping the current threshold.
    ClearCustomThreshold,
}

impl Preferences {
    /// Apply an update in place.
    pub fn apply(&mut self, update: PreferenceUpdate) {
        match update {
            PreferenceUpdate::Enabled(on) => self.enabled = on,
            PreferenceUpdate::SetupCompleted(done) => self.setup_completed = done,
            PreferenceUpdate::Preset(preset) => {
                self.threshold_lux = preset.lux();
                self.custom_threshold_lux = None;
            }
            PreferenceUpdate::CustomThreshold(lux) => {
                let lux = lux.max(0.0);
                self.threshold_lux = lux;
                self.custom_threshold_lux = Some(lux);
            }
            PreferenceUpdate::ClearCustomThreshold => self.custom_threshold_lux = None,
        }
    }

    /// Threshold as the decider uses it: never negative.
    pub fn effective_threshold(&self) -> f32 {
        self.threshold_lux.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_clears_custom_value() {
        let mut prefs = Preferences::default();
        prefs.apply(PreferenceUpdate::CustomThreshold(42.0));
        assert_eq!(prefs.custom_threshold_lux, Some(42.0));
        assert!((prefs.threshold_lux - 42.0).abs() < f32::EPSILON);

        prefs.apply(PreferenceUpdate::Preset(ThresholdPreset::Soft));
        assert_eq!(prefs.custom_threshold_lux, None);
        assert!((prefs.threshold_lux - 10.0).abs() < f32::EPSILON);
    }

    #[test]
    fn negative_threshold_is_clamped() {
        let prefs = Preferences {
            threshold_lux: -5.0,
            ..Preferences::default()
        };
        assert!(prefs.effective_threshold().abs() < f32::EPSILON);
    }
}
