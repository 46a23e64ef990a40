// ── Completion transaction ──
//
// Persists the setup result and starts the dependent monitoring process.
// An atomic swap makes the side effects run exactly once no matter how many
// callers race to complete.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use crate::collaborators::{MonitoringService, PreferenceStore};
use crate::model::PreferenceUpdate;

pub struct CompletionTransaction {
    handled: AtomicBool,
    preferences: Arc<dyn PreferenceStore>,
    monitoring: Arc<dyn MonitoringService>,
}

impl CompletionTransaction {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        monitoring: Arc<dyn MonitoringService>,
    ) -> Self {
        Self {
            handled: AtomicBool::new(false),
            preferences,
            monitoring,
        }
    }

    /// Run the side effects. Returns `false` if they already ran.
    pub fn run(&self) -> bool {
        if self.handled.swap(true, Ordering::AcqRel) {
            return false;
        }

        let writes = [
            ("setup_completed", self.preferences.set(PreferenceUpdate::SetupCompleted(true))),
            ("threshold default", self.preferences.ensure_threshold_default()),
            ("enabled", self.preferences.set(PreferenceUpdate::Enabled(true))),
        ];
        for (what, result) in writes {
            if let Err(e) = result {
                warn!(error = %e, preference = what, "failed to persist setup result");
            }
        }

        if let Err(e) = self.monitoring.start() {
            error!(error = %e, "monitoring service failed to start");
        }
        info!("permission setup completed");
        true
    }

    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::collaborators::MemoryPreferences;
    use crate::error::CoreError;

    #[derive(Default)]
    struct CountingService {
        starts: AtomicU32,
        fail: bool,
    }

    impl MonitoringService for CountingService {
        fn start(&self) -> Result<(), CoreError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoreError::MonitoringStart {
                    message: "foreground start not allowed".into(),
                });
            }
            Ok(())
        }

        fn stop(&self) {}
    }

    #[test]
    fn concurrent_completion_runs_once() {
        let prefs = Arc::new(MemoryPreferences::unset());
        let service = Arc::new(CountingService::default());
        let tx = Arc::new(CompletionTransaction::new(prefs.clone(), service.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tx = Arc::clone(&tx);
                std::thread::spawn(move || tx.run())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(service.starts.load(Ordering::SeqCst), 1);
        let stored = prefs.get();
        assert!(stored.setup_completed);
        assert!(stored.enabled);
        assert!((stored.threshold_lux - 1_000.0).abs() < f32::EPSILON);
    }

    #[test]
    fn start_failure_is_not_fatal() {
        let prefs = Arc::new(MemoryPreferences::default());
        let service = Arc::new(CountingService {
            fail: true,
            ..CountingService::default()
        });
        let tx = CompletionTransaction::new(prefs.clone(), service);
        assert!(tx.run());
        assert!(prefs.get().enabled);
        assert!(!tx.run());
    }
}
