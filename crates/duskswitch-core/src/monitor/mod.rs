// ── Environment monitor ──
//
// Samples the environment probes on a fixed cadence and publishes each
// result as a fresh `EnvironmentSnapshot` through a watch channel. The
// connection flag is latched for the whole monitoring session: once a
// connection is seen it stays true until the monitor is restarted.

pub mod probes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::error::ProbeError;
use crate::model::EnvironmentSnapshot;

pub use probes::{ConnectivityEvents, EnvironmentProbes, UsbState};

/// Periodic environment sampler.
///
/// Cheaply cloneable. `start()` and `stop()` may be called any number of
/// times; only the first `start()` after a `stop()` begins a new session.
pub struct EnvironmentMonitor<P: EnvironmentProbes> {
    inner: Arc<MonitorInner<P>>,
}

impl<P: EnvironmentProbes> Clone for EnvironmentMonitor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct MonitorInner<P> {
    probes: P,
    config: MonitorConfig,
    events: ConnectivityEvents,
    connected_latch: AtomicBool,
    snapshot: watch::Sender<EnvironmentSnapshot>,
    session: Mutex<Option<CancellationToken>>,
}

impl<P: EnvironmentProbes> EnvironmentMonitor<P> {
    pub fn new(probes: P, config: MonitorConfig, events: ConnectivityEvents) -> Self {
        let (snapshot, _) = watch::channel(EnvironmentSnapshot::default());
        Self {
            inner: Arc::new(MonitorInner {
                probes,
                config,
                events,
                connected_latch: AtomicBool::new(false),
                snapshot,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn events(&self) -> &ConnectivityEvents {
        &self.inner.events
    }

    pub fn probes(&self) -> &P {
        &self.inner.probes
    }

    // ── Sampling ─────────────────────────────────────────────────────

    /// Read all probes once. Never fails: an unreadable probe is `false`.
    pub async fn poll(&self) -> EnvironmentSnapshot {
        let probes = &self.inner.probes;
        let (dev, bridge, granted, enumerated) = tokio::join!(
            probes.developer_mode(),
            probes.debug_bridge(),
            probes.permission_granted(),
            probes.device_enumerated(),
        );

        let enumerated = coerce("device_enumerated", enumerated);
        let pushed = self.inner.events.current().is_connected();
        let device_connected = if enumerated || pushed {
            self.inner.connected_latch.store(true, Ordering::Release);
            true
        } else {
            self.inner.connected_latch.load(Ordering::Acquire)
        };

        EnvironmentSnapshot {
            developer_mode_enabled: coerce("developer_mode", dev),
            debug_bridge_enabled: coerce("debug_bridge", bridge),
            device_connected,
            permission_granted: coerce("permission_granted", granted),
        }
    }

    /// Poll and publish the result. Publishing only happens if the session
    /// that was running when the poll began is still running; the snapshot
    /// is returned either way.
    pub async fn refresh(&self) -> EnvironmentSnapshot {
        let session = self.lock_session().clone();
        let snapshot = self.poll().await;

        // Held across the send so a concurrent stop() cannot interleave.
        let current = self.lock_session();
        match session {
            Some(cancel) if current.is_some() && !cancel.is_cancelled() => {
                self.inner.snapshot.send_replace(snapshot);
            }
            _ => debug!("monitor not running, snapshot not published"),
        }
        snapshot
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn subscribe(&self) -> watch::Receiver<EnvironmentSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn latest(&self) -> EnvironmentSnapshot {
        *self.inner.snapshot.borrow()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Register the push listener and begin ticking. No-op while running.
    pub fn start(&self) {
        let mut session = self.lock_session();
        if session.is_some() {
            return;
        }

        // New session: forget connections seen by the previous one.
        self.inner
            .connected_latch
            .store(self.inner.events.current().is_connected(), Ordering::Release);

        let cancel = CancellationToken::new();
        tokio::spawn(listen_task(self.clone(), cancel.clone()));
        tokio::spawn(tick_task(self.clone(), cancel.clone()));
        *session = Some(cancel);
        info!(tick = ?self.inner.config.tick, "environment monitoring started");
    }

    /// Unregister the listener and stop ticking. No-op while stopped.
    pub fn stop(&self) {
        if let Some(cancel) = self.lock_session().take() {
            cancel.cancel();
            info!("environment monitoring stopped");
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn coerce(probe: &'static str, result: Result<bool, ProbeError>) -> bool {
    result.unwrap_or_else(|e| {
        debug!(probe, error = %e, "probe failed, reading as false");
        false
    })
}

// ── Background tasks ─────────────────────────────────────────────────

async fn tick_task<P: EnvironmentProbes>(monitor: EnvironmentMonitor<P>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(monitor.inner.config.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                monitor.refresh().await;
            }
        }
    }
    debug!("monitor tick task exited");
}

async fn listen_task<P: EnvironmentProbes>(
    monitor: EnvironmentMonitor<P>,
    cancel: CancellationToken,
) {
    let mut rx = monitor.inner.events.subscribe();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *rx.borrow_and_update();
                debug!(?state, "usb state notification");
                if state.is_connected() {
                    monitor.inner.connected_latch.store(true, Ordering::Release);
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
