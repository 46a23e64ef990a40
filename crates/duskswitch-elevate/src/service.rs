//! Companion elevation service.
//!
//! Runs inside a privileged process and executes exactly one shell command
//! per connection, replying with its exit code. stdout/stderr are logged for
//! diagnostics and never returned. Nothing is retained between calls: each
//! connection owns its own framed buffers.
//!
//! # Example
//!
//! ```rust,ignore
//! use duskswitch_elevate::service::CompanionService;
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! CompanionService::new("/data/local/tmp/duskswitch.sock")
//!     .serve(cancel.clone())
//!     .await?;
//! ```

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::protocol::{
    EXECUTE_TRANSACTION, INTERFACE_DESCRIPTOR, INTERFACE_TRANSACTION, Reply, Request,
    ServiceCodec,
};

/// Exit code reported when the command is blank or the shell cannot run.
pub const SHELL_FAILURE_EXIT_CODE: i32 = -1;

/// How long a connected peer has to send its request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_SHELL: &str = "sh";

/// Pause after a failed accept, so fd exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// ── CompanionService ─────────────────────────────────────────────────

/// The privileged helper, bound to a Unix socket path.
#[derive(Debug, Clone)]
pub struct CompanionService {
    socket_path: PathBuf,
    shell: String,
    allowed_uids: Vec<u32>,
    request_timeout: Duration,
}

impl CompanionService {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            shell: DEFAULT_SHELL.to_owned(),
            allowed_uids: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Use a different shell binary (must accept `-c <command>`).
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Restrict callers to the given uids. Empty means any peer that can
    /// open the socket.
    pub fn allow_uids(mut self, uids: impl IntoIterator<Item = u32>) -> Self {
        self.allowed_uids = uids.into_iter().collect();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<(), Error> {
        let listener = self.bind()?;
        info!(path = %self.socket_path.display(), "companion service listening");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _addr)) => stream,
                        Err(e) => {
                            accept_failed(&e).await;
                            continue;
                        }
                    };
                    let svc = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = svc.handle_connection(stream).await {
                            warn!(error = %e, "companion connection failed");
                        }
                    });
                }
            }
        }

        self.cleanup();
        debug!("companion service stopped");
        Ok(())
    }

    /// Answer one command request, then exit. Liveness queries and peers
    /// that hang up, stall or send garbage do not count.
    pub async fn serve_once(&self, cancel: CancellationToken) -> Result<(), Error> {
        let listener = self.bind()?;
        info!(path = %self.socket_path.display(), "companion service waiting for one bind");

        loop {
            let stream = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        accept_failed(&e).await;
                        continue;
                    }
                },
            };
            match self.handle_connection(stream).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "companion connection failed"),
            }
        }

        self.cleanup();
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, Error> {
        // A stale socket from a previous run blocks bind().
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!(path = %self.socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        restrict_permissions(&self.socket_path)?;
        Ok(listener)
    }

    fn cleanup(&self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove companion socket");
            }
        }
    }

    /// Returns whether a command request was answered.
    async fn handle_connection(&self, stream: UnixStream) -> Result<bool, Error> {
        let peer_uid = stream.peer_cred().ok().map(|cred| cred.uid());
        let mut framed = Framed::new(stream, ServiceCodec);

        let request = match tokio::time::timeout(self.request_timeout, framed.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => {
                debug!("peer closed before sending a request");
                return Ok(false);
            }
            Err(_) => {
                debug!(timeout = ?self.request_timeout, "peer sent no request in time");
                return Ok(false);
            }
        };

        let executes = request.code == EXECUTE_TRANSACTION;
        let reply = if self.peer_allowed(peer_uid) {
            dispatch(request, &self.shell).await
        } else {
            warn!(?peer_uid, "rejecting caller not on the uid allowlist");
            Reply::SecurityRejected(format!("uid {peer_uid:?} is not authorized"))
        };

        framed.send(reply).await?;
        Ok(executes)
    }

    fn peer_allowed(&self, peer_uid: Option<u32>) -> bool {
        if self.allowed_uids.is_empty() {
            return true;
        }
        peer_uid.is_some_and(|uid| self.allowed_uids.contains(&uid))
    }
}

async fn accept_failed(e: &std::io::Error) {
    warn!(error = %e, "accept failed, continuing");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), Error> {
    Ok(())
}

// ── Transaction dispatch ─────────────────────────────────────────────

/// Answer a single request. Never executes anything unless the interface
/// token matches.
pub async fn dispatch(request: Request, shell: &str) -> Reply {
    match request.code {
        INTERFACE_TRANSACTION => Reply::Descriptor(INTERFACE_DESCRIPTOR.to_owned()),
        EXECUTE_TRANSACTION => {
            if request.interface_token != INTERFACE_DESCRIPTOR {
                warn!(token = %request.interface_token, "rejecting request with bad interface token");
                return Reply::BadInterfaceToken(format!(
                    "expected {INTERFACE_DESCRIPTOR}, got {}",
                    request.interface_token
                ));
            }
            debug!(command = %request.command, "received command");
            Reply::ExitCode(run_shell(shell, &request.command).await)
        }
        other => {
            debug!(code = other, "unknown transaction");
            Reply::UnknownTransaction
        }
    }
}

/// Run `command` through `shell -c` and return its exit code.
///
/// Output is logged line by line. Blank commands, spawn failures and
/// signal terminations all report [`SHELL_FAILURE_EXIT_CODE`].
pub async fn run_shell(shell: &str, command: &str) -> i32 {
    if command.trim().is_empty() {
        return SHELL_FAILURE_EXIT_CODE;
    }

    let output = Command::new(shell)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => {
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                debug!("shell-out: {line}");
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                warn!("shell-err: {line}");
            }
            output.status.code().unwrap_or(SHELL_FAILURE_EXIT_CODE)
        }
        Err(e) => {
            error!(error = %e, shell, "shell execution failed");
            SHELL_FAILURE_EXIT_CODE
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::ClientCodec;

    #[tokio::test]
    async fn bad_token_never_executes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let request = Request {
            code: EXECUTE_TRANSACTION,
            interface_token: "someone.else".into(),
            command: format!("touch {}", marker.display()),
        };

        let reply = dispatch(request, "sh").await;
        assert!(matches!(reply, Reply::BadInterfaceToken(_)));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let reply = dispatch(Request::execute("exit 17"), "sh").await;
        assert_eq!(reply, Reply::ExitCode(17));
    }

    #[tokio::test]
    async fn blank_command_reports_failure() {
        assert_eq!(run_shell("sh", "   ").await, SHELL_FAILURE_EXIT_CODE);
    }

    #[tokio::test]
    async fn missing_shell_reports_failure() {
        assert_eq!(
            run_shell("/nonexistent/shell", "true").await,
            SHELL_FAILURE_EXIT_CODE
        );
    }

    #[tokio::test]
    async fn interface_query_returns_descriptor() {
        let reply = dispatch(Request::interface_query(), "sh").await;
        assert_eq!(reply, Reply::Descriptor(INTERFACE_DESCRIPTOR.into()));
    }

    #[tokio::test]
    async fn unknown_code_is_not_executed() {
        let request = Request {
            code: 99,
            interface_token: INTERFACE_DESCRIPTOR.into(),
            command: "true".into(),
        };
        assert_eq!(dispatch(request, "sh").await, Reply::UnknownTransaction);
    }

    async fn connect_when_listening(path: &Path) -> UnixStream {
        loop {
            if let Ok(s) = UnixStream::connect(path).await {
                break s;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn exchange(stream: UnixStream, request: Request) -> Reply {
        let mut framed = Framed::new(stream, ClientCodec);
        framed.send(request).await.unwrap();
        framed.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn serve_once_answers_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.sock");
        let service = CompanionService::new(&path);
        let cancel = CancellationToken::new();

        let server = tokio::spawn({
            let service = service.clone();
            let cancel = cancel.clone();
            async move { service.serve_once(cancel).await }
        });

        let reply = exchange(connect_when_listening(&path).await, Request::execute("exit 3")).await;
        assert_eq!(reply, Reply::ExitCode(3));

        server.await.unwrap().unwrap();
        assert!(!path.exists(), "socket should be removed after serving");
    }

    #[test]
    fn allowlist_rejects_unknown_peers() {
        let service = CompanionService::new("/tmp/unused.sock").allow_uids([2000]);
        assert!(service.peer_allowed(Some(2000)));
        assert!(!service.peer_allowed(Some(10123)));
        assert!(!service.peer_allowed(None));
        assert!(CompanionService::new("/tmp/unused.sock").peer_allowed(None));
    }

    #[tokio::test]
    async fn idle_peer_does_not_block_other_callers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.sock");
        let cancel = CancellationToken::new();
        let server = tokio::spawn({
            let service = CompanionService::new(&path);
            let cancel = cancel.clone();
            async move { service.serve(cancel).await }
        });

        // Connected, but never sends a request.
        let _idle = connect_when_listening(&path).await;

        let caller = connect_when_listening(&path).await;
        let reply = tokio::time::timeout(
            Duration::from_secs(2),
            exchange(caller, Request::execute("exit 5")),
        )
        .await
        .expect("second caller was blocked by the idle one");
        assert_eq!(reply, Reply::ExitCode(5));

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn serve_once_outlasts_stalled_peers_and_pings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.sock");
        let service =
            CompanionService::new(&path).with_request_timeout(Duration::from_millis(100));
        let server = tokio::spawn(async move { service.serve_once(CancellationToken::new()).await });

        let _stalled = connect_when_listening(&path).await;
        let pong = exchange(connect_when_listening(&path).await, Request::interface_query()).await;
        assert_eq!(pong, Reply::Descriptor(INTERFACE_DESCRIPTOR.into()));

        let reply = exchange(connect_when_listening(&path).await, Request::execute("exit 3")).await;
        assert_eq!(reply, Reply::ExitCode(3));

        tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("serve_once should exit after answering")
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }
}
