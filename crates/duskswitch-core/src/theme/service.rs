// ── Theme service ──
//
// The dependent monitoring process started by setup completion. It follows
// the preference store, waits for screen-on triggers and runs the decider
// once per trigger. Evaluations are serialized; triggers arriving while one
// runs collapse into a single follow-up evaluation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::decider::{
    DisplayModeControl, Evaluation, HysteresisThemeDecider, SensorSource, ThemeDecisionState,
};
use crate::collaborators::{MonitoringService, PreferenceStore};
use crate::error::CoreError;
use crate::model::{PreferenceUpdate, Preferences};

const EVALUATION_CHANNEL_SIZE: usize = 16;

pub struct ThemeService<S, D> {
    inner: Arc<ServiceInner<S, D>>,
}

impl<S, D> Clone for ThemeService<S, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ServiceInner<S, D> {
    decider: HysteresisThemeDecider<S, D>,
    preferences: Arc<dyn PreferenceStore>,
    threshold: ArcSwap<f32>,
    enabled: AtomicBool,
    state: tokio::sync::Mutex<ThemeDecisionState>,
    screen_on: Notify,
    evaluations: broadcast::Sender<Evaluation>,
    session: Mutex<Option<CancellationToken>>,
}

impl<S: SensorSource, D: DisplayModeControl> ThemeService<S, D> {
    pub fn new(decider: HysteresisThemeDecider<S, D>, preferences: Arc<dyn PreferenceStore>) -> Self {
        let prefs = preferences.get();
        let threshold = prefs.effective_threshold();
        let (evaluations, _) = broadcast::channel(EVALUATION_CHANNEL_SIZE);
        Self {
            inner: Arc::new(ServiceInner {
                decider,
                preferences,
                threshold: ArcSwap::from_pointee(threshold),
                enabled: AtomicBool::new(prefs.enabled),
                state: tokio::sync::Mutex::new(ThemeDecisionState::new(threshold, false)),
                screen_on: Notify::new(),
                evaluations,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn threshold(&self) -> f32 {
        **self.inner.threshold.load()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.lock_session().is_some()
    }

    pub fn evaluations(&self) -> broadcast::Receiver<Evaluation> {
        self.inner.evaluations.subscribe()
    }

    pub fn decider(&self) -> &HysteresisThemeDecider<S, D> {
        &self.inner.decider
    }

    /// Signal that the screen turned on.
    pub fn screen_on(&self) {
        self.inner.screen_on.notify_one();
    }

    /// Evaluate immediately on the caller's task.
    pub async fn evaluate_now(&self) -> Result<Evaluation, CoreError> {
        evaluate(&self.inner).await
    }

    /// Disable the feature and stop. Mirrors the "stop" action of a
    /// running service.
    pub fn disable(&self) -> Result<(), CoreError> {
        self.inner
            .preferences
            .set(PreferenceUpdate::Enabled(false))?;
        self.inner.enabled.store(false, Ordering::Release);
        MonitoringService::stop(self);
        Ok(())
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: SensorSource, D: DisplayModeControl> MonitoringService for ThemeService<S, D> {
    fn start(&self) -> Result<(), CoreError> {
        let mut session = self.lock_session();
        if session.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CoreError::MonitoringStart {
                message: e.to_string(),
            }
        })?;

        apply_preferences(&self.inner, &self.inner.preferences.get());

        let cancel = CancellationToken::new();
        runtime.spawn(preferences_task(Arc::clone(&self.inner), cancel.clone()));
        runtime.spawn(screen_on_task(Arc::clone(&self.inner), cancel.clone()));
        *session = Some(cancel);
        info!(
            threshold = self.threshold(),
            enabled = self.is_enabled(),
            "theme service started"
        );
        Ok(())
    }

    fn stop(&self) {
        if let Some(cancel) = self.lock_session().take() {
            cancel.cancel();
            info!("theme service stopped");
        }
    }
}

fn apply_preferences<S, D>(inner: &ServiceInner<S, D>, prefs: &Preferences) {
    inner.threshold.store(Arc::new(prefs.effective_threshold()));
    inner.enabled.store(prefs.enabled, Ordering::Release);
}

async fn evaluate<S: SensorSource, D: DisplayModeControl>(
    inner: &ServiceInner<S, D>,
) -> Result<Evaluation, CoreError> {
    if !inner.enabled.load(Ordering::Acquire) {
        return Ok(Evaluation::Skipped);
    }

    let mut state = inner.state.lock().await;
    state.set_threshold(**inner.threshold.load());
    // Someone else may have changed the mode since our last switch.
    match inner.decider.display().is_dark().await {
        Ok(dark) => state.is_currently_dark = dark,
        Err(e) => warn!(error = %e, "could not read display mode, using last known (non-fatal)"),
    }

    let evaluation = inner.decider.evaluate(&mut state).await?;
    let _ = inner.evaluations.send(evaluation);
    Ok(evaluation)
}

// ── Background tasks ─────────────────────────────────────────────────

async fn preferences_task<S, D>(inner: Arc<ServiceInner<S, D>>, cancel: CancellationToken) {
    let mut rx = inner.preferences.subscribe();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let prefs = rx.borrow_and_update().clone();
                debug!(
                    threshold = prefs.effective_threshold(),
                    enabled = prefs.enabled,
                    "preferences changed"
                );
                apply_preferences(&inner, &prefs);
            }
        }
    }
}

async fn screen_on_task<S: SensorSource, D: DisplayModeControl>(
    inner: Arc<ServiceInner<S, D>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = inner.screen_on.notified() => {
                debug!("screen on");
                match evaluate(&inner).await {
                    Ok(evaluation) => debug!(?evaluation, "evaluation finished"),
                    Err(e) => warn!(error = %e, "theme evaluation failed (non-fatal)"),
                }
            }
        }
    }
    debug!("screen-on task exited");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::collaborators::MemoryPreferences;
    use crate::error::SensorError;
    use crate::model::ThresholdPreset;
    use crate::theme::decider::{SensorKind, SensorSample};

    /// Light level adjustable from the test, no proximity sensor.
    #[derive(Default)]
    struct Lamp {
        lux: Mutex<f32>,
    }

    impl SensorSource for Arc<Lamp> {
        async fn read_once(&self, kind: SensorKind) -> Result<SensorSample, SensorError> {
            match kind {
                SensorKind::Proximity => Err(SensorError::Unavailable { kind: kind.name() }),
                SensorKind::Light => Ok(SensorSample {
                    kind,
                    value: *self.lux.lock().unwrap(),
                }),
            }
        }
    }

    #[derive(Default)]
    struct Panel {
        dark: AtomicBool,
        writes: AtomicU32,
    }

    impl DisplayModeControl for Arc<Panel> {
        async fn is_dark(&self) -> Result<bool, CoreError> {
            Ok(self.dark.load(Ordering::SeqCst))
        }

        async fn set_dark(&self, dark: bool) -> Result<(), CoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.dark.store(dark, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service(
        prefs: &Arc<MemoryPreferences>,
    ) -> (ThemeService<Arc<Lamp>, Arc<Panel>>, Arc<Lamp>, Arc<Panel>) {
        let lamp = Arc::new(Lamp::default());
        let panel = Arc::new(Panel::default());
        let decider = HysteresisThemeDecider::new(Arc::clone(&lamp), Arc::clone(&panel));
        let prefs: Arc<dyn PreferenceStore> = prefs.clone();
        (ThemeService::new(decider, prefs), lamp, panel)
    }

    fn enabled_prefs() -> Arc<MemoryPreferences> {
        Arc::new(MemoryPreferences::new(Preferences {
            enabled: true,
            ..Preferences::default()
        }))
    }

    #[tokio::test]
    async fn disabled_service_skips_evaluation() {
        let prefs = Arc::new(MemoryPreferences::default());
        let (service, _, panel) = service(&prefs);
        assert_eq!(service.evaluate_now().await.unwrap(), Evaluation::Skipped);
        assert_eq!(panel.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn follows_threshold_changes() {
        let prefs = enabled_prefs();
        let (service, lamp, panel) = service(&prefs);
        service.start().unwrap();
        *lamp.lux.lock().unwrap() = 50.0;

        // 50 lux is bright against Soft (10 lux): stays light.
        prefs
            .set(PreferenceUpdate::Preset(ThresholdPreset::Soft))
            .unwrap();
        tokio::task::yield_now().await;
        while (service.threshold() - 10.0).abs() > f32::EPSILON {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            service.evaluate_now().await.unwrap(),
            Evaluation::Kept {
                lux: 50.0,
                dark: false
            }
        );

        // Against Bright (100 lux) the same reading is dark.
        prefs
            .set(PreferenceUpdate::Preset(ThresholdPreset::Bright))
            .unwrap();
        while (service.threshold() - 100.0).abs() > f32::EPSILON {
            tokio::task::yield_now().await;
        }
        assert!(service.evaluate_now().await.unwrap().changed());
        assert!(panel.dark.load(Ordering::SeqCst));
        service.stop();
    }

    #[tokio::test]
    async fn screen_on_triggers_an_evaluation() {
        let prefs = enabled_prefs();
        let (service, lamp, panel) = service(&prefs);
        let mut evaluations = service.evaluations();
        *lamp.lux.lock().unwrap() = 5.0;

        service.start().unwrap();
        service.start().unwrap();
        service.screen_on();

        let evaluation = evaluations.recv().await.unwrap();
        assert_eq!(evaluation, Evaluation::Switched { lux: 5.0, dark: true });
        assert_eq!(panel.writes.load(Ordering::SeqCst), 1);
        service.stop();
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn external_mode_change_is_respected() {
        let prefs = enabled_prefs();
        let (service, lamp, panel) = service(&prefs);
        *lamp.lux.lock().unwrap() = 1_050.0;

        // Inside the band: whatever the display currently shows is kept.
        panel.dark.store(true, Ordering::SeqCst);
        assert_eq!(
            service.evaluate_now().await.unwrap(),
            Evaluation::Kept {
                lux: 1_050.0,
                dark: true
            }
        );
        panel.dark.store(false, Ordering::SeqCst);
        assert_eq!(
            service.evaluate_now().await.unwrap(),
            Evaluation::Kept {
                lux: 1_050.0,
                dark: false
            }
        );
        assert_eq!(panel.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disable_persists_and_stops() {
        let prefs = enabled_prefs();
        let (service, _, _) = service(&prefs);
        service.start().unwrap();
        service.disable().unwrap();
        assert!(!prefs.get().enabled);
        assert!(!service.is_running());
        assert_eq!(service.evaluate_now().await.unwrap(), Evaluation::Skipped);
    }
}
