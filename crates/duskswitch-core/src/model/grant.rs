// ── Grant outcome ──

use serde::{Deserialize, Serialize};

/// Normalized outcome of every elevation strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GrantResult {
    Success,
    /// The companion service is not running or offered no endpoint.
    ServiceUnavailable,
    /// The companion service has not authorized this caller (yet).
    NotAuthorized,
    CommandFailed { exit_code: i32 },
    Unexpected { error: String },
}

impl GrantResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn unexpected(error: impl Into<String>) -> Self {
        Self::Unexpected {
            error: error.into(),
        }
    }

    /// Map a shell exit code.
    pub fn from_exit_code(exit_code: i32) -> Self {
        if exit_code == 0 {
            Self::Success
        } else {
            Self::CommandFailed { exit_code }
        }
    }

    /// Short identity for logs and machine-readable output.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ServiceUnavailable => "service_unavailable",
            Self::NotAuthorized => "not_authorized",
            Self::CommandFailed { .. } => "command_failed",
            Self::Unexpected { .. } => "unexpected",
        }
    }
}

impl std::fmt::Display for GrantResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("permission granted"),
            Self::ServiceUnavailable => f.write_str("companion service unavailable"),
            Self::NotAuthorized => f.write_str("not authorized by the companion service"),
            Self::CommandFailed { exit_code } => write!(f, "grant command exited with {exit_code}"),
            Self::Unexpected { error } => write!(f, "unexpected failure: {error}"),
        }
    }
}
