// ── Environment probes ──
//
// The pull side (four boolean reads) and the push side (USB state
// notifications) the monitor combines into one snapshot.

use std::future::Future;

use tokio::sync::watch;

use crate::error::ProbeError;

/// Boolean environment reads. Implementations report failures as errors;
/// the monitor decides what a failure means.
pub trait EnvironmentProbes: Send + Sync + 'static {
    fn developer_mode(&self) -> impl Future<Output = Result<bool, ProbeError>> + Send;

    fn debug_bridge(&self) -> impl Future<Output = Result<bool, ProbeError>> + Send;

    fn permission_granted(&self) -> impl Future<Output = Result<bool, ProbeError>> + Send;

    /// Periodic enumeration fallback for the connection state.
    fn device_enumerated(&self) -> impl Future<Output = Result<bool, ProbeError>> + Send;
}

/// One USB state notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsbState {
    pub connected: bool,
    pub configured: bool,
    pub data_connected: bool,
    pub adb: bool,
    pub host_connected: bool,
}

impl UsbState {
    /// Cable present and some function actually negotiated.
    pub fn is_connected(&self) -> bool {
        self.connected && (self.configured || self.data_connected || self.adb || self.host_connected)
    }
}

/// Push-style connectivity notifications.
///
/// Sticky: a subscriber sees the most recent state immediately, the way the
/// platform replays its last USB state broadcast to new receivers.
#[derive(Debug, Clone)]
pub struct ConnectivityEvents {
    tx: watch::Sender<UsbState>,
}

impl Default for ConnectivityEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityEvents {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(UsbState::default());
        Self { tx }
    }

    pub fn publish(&self, state: UsbState) {
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<UsbState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> UsbState {
        *self.tx.borrow()
    }
}
