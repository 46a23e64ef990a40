// ── Threshold presets ──
//
// The adaptive theme threshold is chosen from a short ordered list of
// presets. A custom value is shown in place of the preset nearest to it.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Preset light thresholds, ordered from darkest to brightest.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ThresholdPreset {
    Dark,
    Dim,
    Soft,
    Bright,
    #[default]
    Daylight,
    Sunlight,
}

impl ThresholdPreset {
    pub fn lux(self) -> f32 {
        match self {
            Self::Dark => 0.0,
            Self::Dim => 1.0,
            Self::Soft => 10.0,
            Self::Bright => 100.0,
            Self::Daylight => 1_000.0,
            Self::Sunlight => 10_000.0,
        }
    }

    /// Position in the ordered preset list.
    pub fn index(self) -> usize {
        Self::iter().position(|p| p == self).unwrap_or_default()
    }

    /// Preset at `index`, clamped into range.
    pub fn from_index(index: i64) -> Self {
        let last = Self::iter().count() - 1;
        let clamped = usize::try_from(index.max(0)).map_or(last, |i| i.min(last));
        Self::iter().nth(clamped).unwrap_or_default()
    }

    /// Preset matching `lux` exactly, else the closest one. Equally close
    /// presets resolve to the lower index.
    pub fn nearest(lux: f32) -> Self {
        if let Some(exact) = Self::iter().find(|p| p.lux().total_cmp(&lux).is_eq()) {
            return exact;
        }
        Self::iter()
            .min_by(|a, b| (a.lux() - lux).abs().total_cmp(&(b.lux() - lux).abs()))
            .unwrap_or_default()
    }
}

/// One entry of the threshold scale as a UI would show it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdStep {
    pub index: usize,
    pub preset: ThresholdPreset,
    pub lux: f32,
    /// This entry shows the user's custom value instead of the preset.
    pub custom: bool,
}

/// The ordered preset scale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdModel;

impl ThresholdModel {
    pub fn presets() -> impl Iterator<Item = ThresholdPreset> {
        ThresholdPreset::iter()
    }

    /// Preset scale with `custom` (if any) substituted at its nearest slot.
    pub fn display_steps(custom: Option<f32>) -> Vec<ThresholdStep> {
        let custom_slot = custom.map(|lux| (ThresholdPreset::nearest(lux).index(), lux));
        ThresholdPreset::iter()
            .enumerate()
            .map(|(index, preset)| match custom_slot {
                Some((slot, lux)) if slot == index => ThresholdStep {
                    index,
                    preset,
                    lux,
                    custom: true,
                },
                _ => ThresholdStep {
                    index,
                    preset,
                    lux: preset.lux(),
                    custom: false,
                },
            })
            .collect()
    }

    /// Slot the current threshold occupies on the scale.
    pub fn index_for(lux: f32) -> usize {
        ThresholdPreset::nearest(lux).index()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_is_daylight() {
        assert_eq!(ThresholdPreset::default(), ThresholdPreset::Daylight);
        assert!((ThresholdPreset::default().lux() - 1_000.0).abs() < f32::EPSILON);
    }

    #[test]
    fn from_index_clamps() {
        assert_eq!(ThresholdPreset::from_index(-3), ThresholdPreset::Dark);
        assert_eq!(ThresholdPreset::from_index(2), ThresholdPreset::Soft);
        assert_eq!(ThresholdPreset::from_index(99), ThresholdPreset::Sunlight);
    }

    #[test]
    fn nearest_prefers_exact_then_closest() {
        assert_eq!(ThresholdPreset::nearest(100.0), ThresholdPreset::Bright);
        assert_eq!(ThresholdPreset::nearest(700.0), ThresholdPreset::Daylight);
        assert_eq!(ThresholdPreset::nearest(-20.0), ThresholdPreset::Dark);
        assert_eq!(ThresholdPreset::nearest(50_000.0), ThresholdPreset::Sunlight);
    }

    #[test]
    fn equidistant_value_resolves_to_lower_index() {
        // 5.5 is 4.5 away from both Dim (1) and Soft (10).
        assert_eq!(ThresholdPreset::nearest(5.5), ThresholdPreset::Dim);
    }

    #[test]
    fn custom_value_replaces_its_nearest_slot() {
        let steps = ThresholdModel::display_steps(Some(250.0));
        let custom: Vec<_> = steps.iter().filter(|s| s.custom).collect();
        assert_eq!(custom.len(), 1);
        assert_eq!(custom[0].preset, ThresholdPreset::Bright);
        assert!((custom[0].lux - 250.0).abs() < f32::EPSILON);

        let plain = ThresholdModel::display_steps(None);
        assert!(plain.iter().all(|s| !s.custom));
        assert_eq!(plain.len(), 6);
    }

    #[test]
    fn names_parse_case_insensitively() {
        assert_eq!(
            "DayLight".parse::<ThresholdPreset>().unwrap(),
            ThresholdPreset::Daylight
        );
        assert_eq!(ThresholdPreset::Sunlight.to_string(), "sunlight");
    }
}
