// ── Platform implementations ──
//
// Concrete probes, sensors and display control backed by device commands
// and sysfs. Everything above this module only sees the traits.

pub mod display;
pub mod probes;
pub mod sensors;
pub mod shell;

pub use display::{MemoryDisplay, UiModeDisplay};
pub use probes::{ProbeCommands, SystemProbes};
pub use sensors::{IioSensors, StaticSensors};
