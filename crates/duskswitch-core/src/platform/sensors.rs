// ── Sensor sources ──

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::{ProximityScale, SensorConfig};
use crate::error::SensorError;
use crate::theme::{COVERED_DISTANCE, SensorKind, SensorSample, SensorSource};

/// Driver-provided intensity above which an object counts as near.
const NEAR_LEVEL_ATTRIBUTE: &str = "in_proximity_nearlevel";

/// Linux IIO sysfs attributes, read once per sample.
///
/// Proximity samples leave as distances: intensity readings are folded into
/// `0.0` (covered) or [`COVERED_DISTANCE`] (clear).
#[derive(Debug, Clone)]
pub struct IioSensors {
    light_path: PathBuf,
    proximity_path: Option<PathBuf>,
    proximity_scale: ProximityScale,
}

impl IioSensors {
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            light_path: config.light_path.clone(),
            proximity_path: config.proximity_path.clone(),
            proximity_scale: config.proximity_scale,
        }
    }

    fn path(&self, kind: SensorKind) -> Option<&PathBuf> {
        match kind {
            SensorKind::Light => Some(&self.light_path),
            SensorKind::Proximity => self.proximity_path.as_ref(),
        }
    }

    async fn proximity_distance(&self, raw_path: &Path, raw: f32) -> Result<f32, SensorError> {
        let near_level = match self.proximity_scale {
            ProximityScale::Distance => return Ok(raw),
            ProximityScale::Intensity {
                near_level: Some(level),
            } => level,
            ProximityScale::Intensity { near_level: None } => {
                let level_path = raw_path.with_file_name(NEAR_LEVEL_ATTRIBUTE);
                read_attribute(SensorKind::Proximity, &level_path)
                    .await
                    .inspect_err(|e| debug!(error = %e, "no proximity near level"))?
            }
        };
        let near = raw > 0.0 && raw >= near_level;
        Ok(if near { 0.0 } else { COVERED_DISTANCE })
    }
}

async fn read_attribute(kind: SensorKind, path: &Path) -> Result<f32, SensorError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(SensorError::Unavailable { kind: kind.name() });
        }
        Err(e) => {
            return Err(SensorError::Read {
                kind: kind.name(),
                reason: e.to_string(),
            });
        }
    };

    raw.trim().parse::<f32>().map_err(|e| SensorError::Read {
        kind: kind.name(),
        reason: format!("{:?}: {e}", raw.trim()),
    })
}

impl SensorSource for IioSensors {
    async fn read_once(&self, kind: SensorKind) -> Result<SensorSample, SensorError> {
        let unavailable = SensorError::Unavailable { kind: kind.name() };
        let path = self.path(kind).ok_or(unavailable)?;
        let raw = read_attribute(kind, path).await?;

        let value = match kind {
            SensorKind::Light => raw,
            SensorKind::Proximity => self.proximity_distance(path, raw).await?,
        };
        debug!(%kind, raw, value, "sensor sample");
        Ok(SensorSample { kind, value })
    }
}

/// Fixed readings, for one-shot decisions from the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StaticSensors {
    pub light: f32,
    pub proximity: Option<f32>,
}

impl SensorSource for StaticSensors {
    async fn read_once(&self, kind: SensorKind) -> Result<SensorSample, SensorError> {
        let value = match kind {
            SensorKind::Light => self.light,
            SensorKind::Proximity => self
                .proximity
                .ok_or(SensorError::Unavailable { kind: kind.name() })?,
        };
        Ok(SensorSample { kind, value })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_iio_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let light = dir.path().join("in_illuminance_input");
        std::fs::write(&light, "312.5\n").unwrap();

        let sensors = IioSensors::new(&SensorConfig {
            light_path: light,
            proximity_path: Some(dir.path().join("missing")),
            proximity_scale: ProximityScale::default(),
        });

        let sample = sensors.read_once(SensorKind::Light).await.unwrap();
        assert!((sample.value - 312.5).abs() < f32::EPSILON);
        assert!(matches!(
            sensors.read_once(SensorKind::Proximity).await,
            Err(SensorError::Unavailable { kind: "proximity" })
        ));
    }

    #[tokio::test]
    async fn garbage_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let light = dir.path().join("lux");
        std::fs::write(&light, "bright").unwrap();
        let sensors = IioSensors::new(&SensorConfig {
            light_path: light,
            proximity_path: None,
            proximity_scale: ProximityScale::default(),
        });
        assert!(matches!(
            sensors.read_once(SensorKind::Light).await,
            Err(SensorError::Read { .. })
        ));
        assert!(matches!(
            sensors.read_once(SensorKind::Proximity).await,
            Err(SensorError::Unavailable { .. })
        ));
    }

    fn intensity_sensors(dir: &Path, raw: &str, near_level: Option<f32>) -> IioSensors {
        let proximity = dir.join("in_proximity_raw");
        std::fs::write(&proximity, raw).unwrap();
        IioSensors::new(&SensorConfig {
            light_path: dir.join("in_illuminance_input"),
            proximity_path: Some(proximity),
            proximity_scale: ProximityScale::Intensity { near_level },
        })
    }

    async fn distance_of(sensors: &IioSensors) -> f32 {
        sensors.read_once(SensorKind::Proximity).await.unwrap().value
    }

    #[tokio::test]
    async fn zero_intensity_is_clear() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NEAR_LEVEL_ATTRIBUTE), "100\n").unwrap();
        let sensors = intensity_sensors(dir.path(), "0\n", None);
        assert!(distance_of(&sensors).await >= COVERED_DISTANCE);
    }

    #[tokio::test]
    async fn intensity_at_driver_near_level_is_covered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NEAR_LEVEL_ATTRIBUTE), "100\n").unwrap();

        let sensors = intensity_sensors(dir.path(), "250\n", None);
        assert!(distance_of(&sensors).await < COVERED_DISTANCE);

        let sensors = intensity_sensors(dir.path(), "40\n", None);
        assert!(distance_of(&sensors).await >= COVERED_DISTANCE);
    }

    #[tokio::test]
    async fn configured_near_level_wins_over_driver() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NEAR_LEVEL_ATTRIBUTE), "1000\n").unwrap();
        let sensors = intensity_sensors(dir.path(), "60\n", Some(50.0));
        assert!(distance_of(&sensors).await < COVERED_DISTANCE);
    }

    #[tokio::test]
    async fn unknown_near_level_leaves_proximity_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let sensors = intensity_sensors(dir.path(), "0\n", None);
        assert!(matches!(
            sensors.read_once(SensorKind::Proximity).await,
            Err(SensorError::Unavailable { kind: "proximity" })
        ));
    }

    #[tokio::test]
    async fn distance_scale_passes_readings_through() {
        let dir = tempfile::tempdir().unwrap();
        let proximity = dir.path().join("in_proximity_input");
        std::fs::write(&proximity, "3\n").unwrap();
        let sensors = IioSensors::new(&SensorConfig {
            light_path: dir.path().join("lux"),
            proximity_path: Some(proximity),
            proximity_scale: ProximityScale::Distance,
        });
        assert!((distance_of(&sensors).await - 3.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn uncovered_device_still_switches() {
        use crate::platform::MemoryDisplay;
        use crate::theme::{Evaluation, HysteresisThemeDecider, ThemeDecisionState};

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NEAR_LEVEL_ATTRIBUTE), "100\n").unwrap();
        std::fs::write(dir.path().join("in_illuminance_input"), "20\n").unwrap();
        let sensors = intensity_sensors(dir.path(), "0\n", None);

        let decider = HysteresisThemeDecider::new(sensors, MemoryDisplay::new(false));
        let mut state = ThemeDecisionState::new(100.0, false);
        let evaluation = decider.evaluate(&mut state).await.unwrap();
        assert_eq!(
            evaluation,
            Evaluation::Switched {
                lux: 20.0,
                dark: true
            }
        );
    }
}
