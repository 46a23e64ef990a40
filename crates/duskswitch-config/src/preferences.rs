// ── File-backed preferences ──
//
// `preferences.toml` beside the config. Writes go to a temporary file that
// is renamed over the old one, so a crash never leaves a torn file. The
// threshold is stored only once someone sets it, which is how
// `ensure_threshold_default` tells "never set" apart from "set to default".

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use duskswitch_core::{CoreError, PreferenceStore, PreferenceUpdate, Preferences, ThresholdPreset};

use crate::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct StoredPreferences {
    enabled: bool,
    setup_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    threshold_lux: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_threshold_lux: Option<f32>,
}

impl StoredPreferences {
    fn resolve(&self) -> Preferences {
        Preferences {
            enabled: self.enabled,
            threshold_lux: self
                .threshold_lux
                .unwrap_or_else(|| ThresholdPreset::default().lux()),
            custom_threshold_lux: self.custom_threshold_lux,
            setup_completed: self.setup_completed,
        }
    }

    fn apply(&mut self, update: PreferenceUpdate) {
        let mut prefs = self.resolve();
        prefs.apply(update);
        self.enabled = prefs.enabled;
        self.setup_completed = prefs.setup_completed;
        self.custom_threshold_lux = prefs.custom_threshold_lux;
        if matches!(
            update,
            PreferenceUpdate::Preset(_) | PreferenceUpdate::CustomThreshold(_)
        ) {
            self.threshold_lux = Some(prefs.threshold_lux);
        }
    }
}

/// [`PreferenceStore`] persisted as TOML.
pub struct FilePreferences {
    path: PathBuf,
    stored: Mutex<StoredPreferences>,
    tx: watch::Sender<Preferences>,
}

impl FilePreferences {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let stored = read_stored(&path)?;
        let (tx, _) = watch::channel(stored.resolve());
        Ok(Self {
            path,
            stored: Mutex::new(stored),
            tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, notifying subscribers if another process changed
    /// it. Returns whether anything changed.
    pub fn reload(&self) -> Result<bool, ConfigError> {
        let fresh = read_stored(&self.path)?;
        let mut stored = self.lock();
        if fresh == *stored {
            return Ok(false);
        }
        *stored = fresh;
        self.tx.send_replace(stored.resolve());
        debug!(path = %self.path.display(), "preferences reloaded");
        Ok(true)
    }

    /// Whether a threshold has ever been written.
    pub fn threshold_stored(&self) -> bool {
        self.lock().threshold_lux.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredPreferences> {
        self.stored.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, stored: &StoredPreferences) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(stored)?;
        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "preferences written");
        Ok(())
    }

    /// Apply `f` to a copy, persist it, then commit and notify.
    fn update(&self, f: impl FnOnce(&mut StoredPreferences)) -> Result<(), CoreError> {
        let mut stored = self.lock();
        let mut next = stored.clone();
        f(&mut next);
        if next == *stored {
            return Ok(());
        }
        self.persist(&next).map_err(|e| CoreError::Preferences {
            message: e.to_string(),
        })?;
        *stored = next;
        self.tx.send_replace(stored.resolve());
        Ok(())
    }
}

fn read_stored(path: &Path) -> Result<StoredPreferences, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredPreferences::default()),
        Err(e) => Err(e.into()),
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }

    fn set(&self, update: PreferenceUpdate) -> Result<(), CoreError> {
        self.update(|stored| stored.apply(update))
    }

    fn ensure_threshold_default(&self) -> Result<(), CoreError> {
        self.update(|stored| {
            stored
                .threshold_lux
                .get_or_insert_with(|| ThresholdPreset::default().lux());
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn store(dir: &tempfile::TempDir) -> FilePreferences {
        FilePreferences::open(dir.path().join("prefs").join("preferences.toml")).unwrap()
    }

    #[test]
    fn missing_file_reads_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = store(&dir);
        assert_eq!(prefs.get(), Preferences::default());
        assert!(!prefs.threshold_stored());
        assert!(!prefs.path().exists());
    }

    #[test]
    fn updates_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = store(&dir);
        prefs.set(PreferenceUpdate::Enabled(true)).unwrap();
        prefs.set(PreferenceUpdate::CustomThreshold(42.0)).unwrap();
        drop(prefs);

        let reopened = store(&dir).get();
        assert!(reopened.enabled);
        assert_eq!(reopened.custom_threshold_lux, Some(42.0));
        assert!((reopened.threshold_lux - 42.0).abs() < f32::EPSILON);
    }

    #[test]
    fn ensure_default_keeps_an_existing_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = store(&dir);
        prefs
            .set(PreferenceUpdate::Preset(ThresholdPreset::Dim))
            .unwrap();
        prefs.ensure_threshold_default().unwrap();
        assert!((prefs.get().threshold_lux - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn ensure_default_writes_when_unset() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = store(&dir);
        prefs.ensure_threshold_default().unwrap();
        assert!(prefs.threshold_stored());
        let raw = std::fs::read_to_string(prefs.path()).unwrap();
        assert!(raw.contains("threshold_lux = 1000.0"));
    }

    #[test]
    fn preset_clears_custom_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = store(&dir);
        let mut rx = prefs.subscribe();
        prefs.set(PreferenceUpdate::CustomThreshold(7.5)).unwrap();
        prefs
            .set(PreferenceUpdate::Preset(ThresholdPreset::Sunlight))
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let latest = rx.borrow_and_update().clone();
        assert_eq!(latest.custom_threshold_lux, None);
        assert!((latest.threshold_lux - 10_000.0).abs() < f32::EPSILON);
    }

    #[test]
    fn reload_picks_up_writes_from_another_store() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = store(&dir);
        let cli = store(&dir);
        let rx = daemon.subscribe();

        cli.set(PreferenceUpdate::Preset(ThresholdPreset::Bright)).unwrap();
        assert!(daemon.reload().unwrap());
        assert!(!daemon.reload().unwrap());
        assert!(rx.has_changed().unwrap());
        assert!((daemon.get().threshold_lux - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferences.toml");
        std::fs::write(&path, "enabled = maybe").unwrap();
        assert!(matches!(
            FilePreferences::open(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
