// ── External collaborators ──
//
// Interfaces the core consumes but does not own: preference persistence and
// the lifecycle of the dependent monitoring process. `MemoryPreferences` is
// the in-process store used by tests and one-shot commands.

use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::CoreError;
use crate::model::{PreferenceUpdate, Preferences, ThresholdPreset};

/// Persistent user preferences with change notification.
pub trait PreferenceStore: Send + Sync {
    fn get(&self) -> Preferences;

    /// Receiver that observes every change after subscription.
    fn subscribe(&self) -> watch::Receiver<Preferences>;

    fn set(&self, update: PreferenceUpdate) -> Result<(), CoreError>;

    /// Write the default threshold if none has ever been stored.
    fn ensure_threshold_default(&self) -> Result<(), CoreError>;
}

/// Lifecycle of the dependent monitoring process. Both calls are
/// idempotent.
pub trait MonitoringService: Send + Sync {
    fn start(&self) -> Result<(), CoreError>;
    fn stop(&self);
}

// ── MemoryPreferences ────────────────────────────────────────────────

/// Non-persistent [`PreferenceStore`].
pub struct MemoryPreferences {
    tx: watch::Sender<Preferences>,
    threshold_stored: Mutex<bool>,
}

impl MemoryPreferences {
    pub fn new(initial: Preferences) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            threshold_stored: Mutex::new(true),
        }
    }

    /// Store with no threshold written yet.
    pub fn unset() -> Self {
        let store = Self::new(Preferences::default());
        *store
            .threshold_stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = false;
        store
    }
}

impl Default for MemoryPreferences {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self) -> Preferences {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Preferences> {
        self.tx.subscribe()
    }

    fn set(&self, update: PreferenceUpdate) -> Result<(), CoreError> {
        if matches!(
            update,
            PreferenceUpdate::Preset(_) | PreferenceUpdate::CustomThreshold(_)
        ) {
            *self
                .threshold_stored
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = true;
        }
        self.tx.send_modify(|prefs| prefs.apply(update));
        Ok(())
    }

    fn ensure_threshold_default(&self) -> Result<(), CoreError> {
        let mut stored = self
            .threshold_stored
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !*stored {
            *stored = true;
            self.tx
                .send_modify(|prefs| prefs.threshold_lux = ThresholdPreset::default().lux());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_default_only_writes_when_unset() {
        let store = MemoryPreferences::unset();
        store
            .set(PreferenceUpdate::Preset(ThresholdPreset::Dim))
            .ok();
        store.ensure_threshold_default().ok();
        assert!((store.get().threshold_lux - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn subscribers_see_updates() {
        let store = MemoryPreferences::default();
        let rx = store.subscribe();
        store.set(PreferenceUpdate::Enabled(true)).ok();
        assert!(rx.has_changed().unwrap_or(false));
        assert!(rx.borrow().enabled);
    }
}
