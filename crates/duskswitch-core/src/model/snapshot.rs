// ── Environment snapshot ──

use serde::{Deserialize, Serialize};

/// Point-in-time reading of the environment probes.
///
/// Every field is a plain boolean: a probe that could not be read is
/// `false`. A new snapshot always replaces the previous one wholesale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub developer_mode_enabled: bool,
    pub debug_bridge_enabled: bool,
    pub device_connected: bool,
    pub permission_granted: bool,
}

impl EnvironmentSnapshot {
    /// Both developer mode and the debug bridge are on.
    pub fn debugging_ready(&self) -> bool {
        self.developer_mode_enabled && self.debug_bridge_enabled
    }
}
