// ── Domain model ──
//
// Plain data shared by the monitor, the setup flow and the theme service.

pub mod grant;
pub mod preferences;
pub mod setup;
pub mod snapshot;
pub mod threshold;

pub use grant::GrantResult;
pub use preferences::{PreferenceUpdate, Preferences};
pub use setup::{Notice, NoticeKind, SetupOutcome, SetupStep, SetupUiState, StepFlags};
pub use snapshot::EnvironmentSnapshot;
pub use threshold::{ThresholdModel, ThresholdPreset, ThresholdStep};
