//! CLI error types with miette diagnostics.
//!
//! Maps core, config and elevation errors into user-facing errors with
//! actionable help text and process exit codes.

use miette::Diagnostic;
use thiserror::Error;

use duskswitch_config::ConfigError;
use duskswitch_core::{CoreError, GrantResult};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const UNAVAILABLE: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Grant ────────────────────────────────────────────────────────
    #[error("The companion service did not authorize duskswitch")]
    #[diagnostic(
        code(duskswitch::not_authorized),
        help(
            "Authorize it on the device running the companion:\n\
             Run: duskswitch companion authorize"
        )
    )]
    NotAuthorized,

    #[error("The companion service is not reachable at {socket}")]
    #[diagnostic(
        code(duskswitch::service_unavailable),
        help(
            "Start it with elevated privileges:\n\
             Run: duskswitch companion serve\n\
             Or grant through superuser: duskswitch grant --via superuser"
        )
    )]
    ServiceUnavailable { socket: String },

    #[error("The grant command exited with status {exit_code}")]
    #[diagnostic(
        code(duskswitch::command_failed),
        help("Run it by hand to see the error:\n{command}")
    )]
    CommandFailed { exit_code: i32, command: String },

    #[error("Grant failed: {message}")]
    #[diagnostic(code(duskswitch::grant_failed))]
    GrantFailed { message: String },

    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(duskswitch::timeout),
        help("Raise companion.bind_timeout_ms in the config, or check the service.")
    )]
    Timeout { seconds: u64 },

    // ── Setup ────────────────────────────────────────────────────────
    #[error("Setup was left before it completed")]
    #[diagnostic(
        code(duskswitch::setup_incomplete),
        help("Run: duskswitch setup")
    )]
    SetupIncomplete,

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(duskswitch::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(duskswitch::config),
        help("Check the file shown by: duskswitch config path")
    )]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(duskswitch::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Companion service error: {0}")]
    #[diagnostic(code(duskswitch::companion))]
    Elevate(#[from] duskswitch_elevate::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotAuthorized => exit_code::AUTH,
            Self::ServiceUnavailable { .. } => exit_code::UNAVAILABLE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Config(ConfigError::Validation { .. }) => {
                exit_code::USAGE
            }
            Self::Elevate(e) if e.is_authorization() => exit_code::AUTH,
            Self::Elevate(e) if e.is_unavailable() => exit_code::UNAVAILABLE,
            _ => exit_code::GENERAL,
        }
    }

    /// Turn a non-successful grant into an error. `Success` maps to `None`.
    pub fn from_grant(result: &GrantResult, socket: &str, command: &str) -> Option<Self> {
        match result {
            GrantResult::Success => None,
            GrantResult::NotAuthorized => Some(Self::NotAuthorized),
            GrantResult::ServiceUnavailable => Some(Self::ServiceUnavailable {
                socket: socket.into(),
            }),
            GrantResult::CommandFailed { exit_code } => Some(Self::CommandFailed {
                exit_code: *exit_code,
                command: command.into(),
            }),
            GrantResult::Unexpected { error } if error.starts_with("timeout") => {
                Some(Self::Timeout {
                    seconds: timeout_seconds(error),
                })
            }
            GrantResult::Unexpected { error } => Some(Self::GrantFailed {
                message: error.clone(),
            }),
        }
    }
}

/// Pull the millisecond figure out of a timeout message, rounded up.
fn timeout_seconds(message: &str) -> u64 {
    message
        .split(|c: char| !c.is_ascii_digit())
        .find_map(|digits| digits.parse::<u64>().ok())
        .map_or(0, |ms| ms.div_ceil(1_000))
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::Elevation(e) => CliError::Elevate(e),
            CoreError::Io(e) => CliError::Io(e),
            other => CliError::Core(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_results_map_to_exit_codes() {
        let code = |r: GrantResult| {
            CliError::from_grant(&r, "/run/c.sock", "pm grant x").map(|e| e.exit_code())
        };
        assert_eq!(code(GrantResult::Success), None);
        assert_eq!(code(GrantResult::NotAuthorized), Some(exit_code::AUTH));
        assert_eq!(
            code(GrantResult::ServiceUnavailable),
            Some(exit_code::UNAVAILABLE)
        );
        assert_eq!(
            code(GrantResult::CommandFailed { exit_code: 17 }),
            Some(exit_code::GENERAL)
        );
        assert_eq!(
            code(GrantResult::unexpected("timeout: no reply within 5000ms")),
            Some(exit_code::TIMEOUT)
        );
    }

    #[test]
    fn timeout_message_rounds_up_to_seconds() {
        assert_eq!(timeout_seconds("timeout: no reply within 5000ms"), 5);
        assert_eq!(timeout_seconds("timeout: no reply within 1500ms"), 2);
        assert_eq!(timeout_seconds("timeout"), 0);
    }
}
