// ── Setup flow state ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

use super::grant::GrantResult;
use super::snapshot::EnvironmentSnapshot;
use duskswitch_elevate::AuthorizationOutcome;

/// Steps of the guided permission setup, in order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SetupStep {
    #[default]
    DevMode,
    Connect,
    Grant,
}

impl SetupStep {
    /// The step after this one. `None` on the last step.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::DevMode => Some(Self::Connect),
            Self::Connect => Some(Self::Grant),
            Self::Grant => None,
        }
    }

    /// The step before this one. `None` on the first step.
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::DevMode => None,
            Self::Connect => Some(Self::DevMode),
            Self::Grant => Some(Self::Connect),
        }
    }

    /// Whether `snapshot` satisfies this step.
    pub fn is_satisfied(self, snapshot: &EnvironmentSnapshot) -> bool {
        match self {
            Self::DevMode => snapshot.debugging_ready(),
            Self::Connect => snapshot.device_connected,
            Self::Grant => snapshot.permission_granted,
        }
    }

    /// 1-based position for display.
    pub fn number(self) -> u8 {
        match self {
            Self::DevMode => 1,
            Self::Connect => 2,
            Self::Grant => 3,
        }
    }
}

/// One boolean per setup step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFlags {
    pub dev_mode: bool,
    pub connect: bool,
    pub grant: bool,
}

impl StepFlags {
    pub const ALL: Self = Self {
        dev_mode: true,
        connect: true,
        grant: true,
    };

    pub fn get(&self, step: SetupStep) -> bool {
        match step {
            SetupStep::DevMode => self.dev_mode,
            SetupStep::Connect => self.connect,
            SetupStep::Grant => self.grant,
        }
    }

    pub fn set(&mut self, step: SetupStep, value: bool) {
        match step {
            SetupStep::DevMode => self.dev_mode = value,
            SetupStep::Connect => self.connect = value,
            SetupStep::Grant => self.grant = value,
        }
    }
}

/// What a dismissible notice reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    Grant { result: GrantResult },
    Authorization { granted: bool },
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    #[serde(flatten)]
    pub kind: NoticeKind,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn grant(result: GrantResult) -> Self {
        Self {
            kind: NoticeKind::Grant { result },
            at: Utc::now(),
        }
    }

    pub fn authorization(outcome: AuthorizationOutcome) -> Self {
        Self {
            kind: NoticeKind::Authorization {
                granted: outcome == AuthorizationOutcome::Granted,
            },
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NoticeKind::Grant { result } => write!(f, "{result}"),
            NoticeKind::Authorization { granted: true } => {
                f.write_str("companion service authorized this app")
            }
            NoticeKind::Authorization { granted: false } => {
                f.write_str("companion service authorization was denied")
            }
        }
    }
}

/// Observable state of the setup flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupUiState {
    pub current_step: SetupStep,
    /// Command to run from an external host.
    pub pending_command: String,
    pub snapshot: EnvironmentSnapshot,
    pub completed_steps: StepFlags,
    /// Ticks left before auto-advance. 0 means no countdown.
    pub countdown: u32,
    pub is_completed: bool,
    pub notice: Option<Notice>,
}

impl SetupUiState {
    pub fn new(pending_command: String) -> Self {
        Self {
            current_step: SetupStep::default(),
            pending_command,
            snapshot: EnvironmentSnapshot::default(),
            completed_steps: StepFlags::default(),
            countdown: 0,
            is_completed: false,
            notice: None,
        }
    }
}

/// How the flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SetupOutcome {
    /// The permission was acquired; return to the main screen.
    Completed,
    /// The user left without completing.
    Exited,
}
