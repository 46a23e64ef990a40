use thiserror::Error;

/// Top-level error type for the `duskswitch-elevate` crate.
///
/// Covers every failure mode of the elevation transport: binding the
/// companion service, framing, the service's own rejections, and the
/// superuser shell. `duskswitch-core` folds these into a `GrantResult`.
#[derive(Debug, Error)]
pub enum Error {
    // ── Binding ─────────────────────────────────────────────────────
    /// The companion service socket could not be reached.
    #[error("Companion service unreachable at {path}: {reason}")]
    Unreachable { path: String, reason: String },

    /// The elevation host refused to check or grant authorization.
    #[error("Authorization check failed: {0}")]
    Authorization(String),

    // ── Protocol ────────────────────────────────────────────────────
    /// The service rejected the call for security reasons.
    #[error("Rejected by companion service: {0}")]
    Security(String),

    /// The request carried the wrong interface identity token.
    #[error("Interface token mismatch: {0}")]
    BadInterfaceToken(String),

    /// A frame could not be decoded.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The service closed the connection before replying.
    #[error("Companion service closed the connection without a reply")]
    NoReply,

    /// The call did not complete in time.
    #[error("Companion call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Shell ───────────────────────────────────────────────────────
    /// The shell (or superuser binary) could not be spawned.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // ── Transport ───────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if the failure is an authorization problem the user
    /// can fix by granting access in the elevation host.
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_) | Self::Security(_))
    }

    /// Returns `true` if the service could simply not be reached.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unreachable { .. } | Self::NoReply => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::NotFound
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }

    /// Short, stable identity of the error, suitable for notices and logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::Authorization(_) => "authorization",
            Self::Security(_) => "security",
            Self::BadInterfaceToken(_) => "bad_interface_token",
            Self::Malformed(_) => "malformed",
            Self::NoReply => "no_reply",
            Self::Timeout { .. } => "timeout",
            Self::Spawn { .. } => "spawn",
            Self::Io(_) => "io",
        }
    }
}
