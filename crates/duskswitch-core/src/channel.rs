// ── Elevation channel ──
//
// Three ways to get the target permission granted, all normalized into
// `GrantResult`: print the command for the user, ask the companion service,
// or pipe the command into a superuser shell. Transport errors never leave
// this module.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use duskswitch_elevate::{
    AuthorizationOutcome, ElevationHost, Error as ElevateError, Reply, Request, ServiceEndpoint,
    SuperuserShell,
};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ElevationConfig, TARGET_PERMISSION};
use crate::model::GrantResult;

/// Command that grants the target permission to `package_id` when run in
/// a device shell. Shown to the user, copied, and piped into `su` verbatim.
pub fn manual_instruction(package_id: &str) -> String {
    format!("pm grant {package_id} {TARGET_PERMISSION}")
}

/// The same command as typed on a host with the debug bridge attached.
pub fn host_instruction(package_id: &str) -> String {
    format!("adb shell {}", manual_instruction(package_id))
}

// ── ReadinessTracker ─────────────────────────────────────────────────

/// Mirrors the host's availability stream into a flag readable without
/// awaiting.
#[derive(Default)]
pub struct ReadinessTracker {
    ready: Arc<AtomicBool>,
    listener: Mutex<Option<CancellationToken>>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow `availability`. Replaces any previous attachment.
    pub fn attach(&self, mut availability: watch::Receiver<bool>) {
        let mut listener = self.lock_listener();
        if let Some(previous) = listener.take() {
            previous.cancel();
        }

        self.ready
            .store(*availability.borrow_and_update(), Ordering::Release);

        let cancel = CancellationToken::new();
        let ready = Arc::clone(&self.ready);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    changed = availability.changed() => {
                        if changed.is_err() {
                            // Host dropped: treat as dead.
                            ready.store(false, Ordering::Release);
                            break;
                        }
                        let up = *availability.borrow_and_update();
                        debug!(up, "companion availability changed");
                        ready.store(up, Ordering::Release);
                    }
                }
            }
        });
        *listener = Some(cancel);
    }

    /// Stop following and report not ready.
    pub fn detach(&self) {
        if let Some(cancel) = self.lock_listener().take() {
            cancel.cancel();
        }
        self.ready.store(false, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn lock_listener(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ReadinessTracker {
    fn drop(&mut self) {
        if let Some(cancel) = self.lock_listener().take() {
            cancel.cancel();
        }
    }
}

// ── ElevationChannel ─────────────────────────────────────────────────

pub struct ElevationChannel<H: ElevationHost> {
    host: Arc<H>,
    readiness: ReadinessTracker,
    superuser: SuperuserShell,
    bind_timeout: Duration,
}

impl<H: ElevationHost> ElevationChannel<H> {
    /// Build a channel and attach its readiness tracker to `host`.
    /// Must be called inside a tokio runtime.
    pub fn new(host: Arc<H>, config: &ElevationConfig) -> Self {
        let readiness = ReadinessTracker::new();
        readiness.attach(host.availability());
        Self {
            host,
            readiness,
            superuser: SuperuserShell::new(config.superuser_binary.clone()),
            bind_timeout: config.bind_timeout,
        }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn readiness(&self) -> &ReadinessTracker {
        &self.readiness
    }

    pub fn authorization_outcomes(&self) -> broadcast::Receiver<AuthorizationOutcome> {
        self.host.authorization_outcomes()
    }

    /// Grant through the companion service.
    ///
    /// Returns `NotAuthorized` right after asking the host for
    /// authorization; retry once the host reports the outcome.
    pub async fn via_elevation_service(&self, package_id: &str) -> GrantResult {
        if !self.readiness.is_ready() {
            debug!("companion service not ready, skipping bind");
            return GrantResult::ServiceUnavailable;
        }

        match self.host.check_authorized() {
            Ok(true) => {}
            Ok(false) => {
                info!("requesting companion authorization");
                self.host.request_authorization();
                return GrantResult::NotAuthorized;
            }
            Err(e) => {
                warn!(error = %e, "authorization check failed");
                return GrantResult::NotAuthorized;
            }
        }

        let command = manual_instruction(package_id);
        let result = match tokio::time::timeout(self.bind_timeout, self.call(command)).await {
            Ok(result) => result,
            Err(_) => call_error(&ElevateError::Timeout {
                timeout_ms: u64::try_from(self.bind_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };
        info!(result = result.label(), "companion grant finished");
        result
    }

    /// Bind, send the one request, map the reply. The bind guard releases
    /// the endpoint on every exit, including cancellation by the timeout.
    async fn call(&self, command: String) -> GrantResult {
        let endpoint = match self.host.bind().await {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return GrantResult::ServiceUnavailable,
            Err(e) if e.is_authorization() => return GrantResult::NotAuthorized,
            Err(e) if e.is_unavailable() => {
                debug!(error = %e, "companion bind failed");
                return GrantResult::ServiceUnavailable;
            }
            Err(e) => return call_error(&e),
        };

        let mut guard = BindGuard {
            host: self.host.as_ref(),
            endpoint: Some(endpoint),
        };
        let Some(endpoint) = guard.endpoint.as_mut() else {
            return GrantResult::ServiceUnavailable;
        };

        match endpoint.transact(Request::execute(command)).await {
            Ok(reply) => map_reply(reply),
            Err(e) => call_error(&e),
        }
    }

    /// Grant by piping the command into the superuser shell.
    pub async fn via_superuser(&self, package_id: &str) -> GrantResult {
        let command = manual_instruction(package_id);
        let result = match self.superuser.run(&command).await {
            Ok(code) => GrantResult::from_exit_code(code),
            Err(e) => GrantResult::unexpected(format!("{}: {e}", e.kind_name())),
        };
        info!(result = result.label(), binary = self.superuser.binary(), "superuser grant finished");
        result
    }
}

impl<H: ElevationHost> Drop for ElevationChannel<H> {
    fn drop(&mut self) {
        self.readiness.detach();
    }
}

struct BindGuard<'a, H: ElevationHost> {
    host: &'a H,
    endpoint: Option<H::Endpoint>,
}

impl<H: ElevationHost> Drop for BindGuard<'_, H> {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            if let Err(e) = self.host.unbind(endpoint) {
                warn!(error = %e, "companion unbind failed (non-fatal)");
            }
        }
    }
}

fn map_reply(reply: Reply) -> GrantResult {
    match reply {
        Reply::ExitCode(code) => GrantResult::from_exit_code(code),
        Reply::SecurityRejected(_) => GrantResult::NotAuthorized,
        Reply::UnknownTransaction => GrantResult::ServiceUnavailable,
        Reply::BadInterfaceToken(msg) => {
            GrantResult::unexpected(format!("bad_interface_token: {msg}"))
        }
        Reply::Descriptor(desc) => {
            GrantResult::unexpected(format!("malformed: descriptor reply to execute ({desc})"))
        }
    }
}

fn call_error(error: &ElevateError) -> GrantResult {
    if error.is_authorization() {
        GrantResult::NotAuthorized
    } else {
        GrantResult::unexpected(format!("{}: {error}", error.kind_name()))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Clone, Copy)]
    enum Behavior {
        Reply(i32),
        NoEndpoint,
        Hang,
        Reject,
    }

    struct FakeHost {
        availability: watch::Sender<bool>,
        outcomes: broadcast::Sender<AuthorizationOutcome>,
        authorized: Result<bool, ()>,
        behavior: Behavior,
        authorization_requests: AtomicU32,
        binds: AtomicU32,
        unbinds: Arc<AtomicU32>,
    }

    impl FakeHost {
        fn new(behavior: Behavior) -> Self {
            Self {
                availability: watch::channel(true).0,
                outcomes: broadcast::channel(4).0,
                authorized: Ok(true),
                behavior,
                authorization_requests: AtomicU32::new(0),
                binds: AtomicU32::new(0),
                unbinds: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    struct FakeEndpoint {
        behavior: Behavior,
    }

    impl ServiceEndpoint for FakeEndpoint {
        async fn transact(&mut self, request: Request) -> Result<Reply, ElevateError> {
            assert!(request.command.starts_with("pm grant dev.test "));
            match self.behavior {
                Behavior::Reply(code) => Ok(Reply::ExitCode(code)),
                Behavior::Reject => Err(ElevateError::Security("caller uid".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Reply::ExitCode(0))
                }
                Behavior::NoEndpoint => unreachable!(),
            }
        }
    }

    impl ElevationHost for FakeHost {
        type Endpoint = FakeEndpoint;

        fn check_authorized(&self) -> Result<bool, ElevateError> {
            self.authorized
                .map_err(|()| ElevateError::Authorization("binder died".into()))
        }

        fn request_authorization(&self) {
            self.authorization_requests.fetch_add(1, Ordering::SeqCst);
        }

        async fn bind(&self) -> Result<Option<FakeEndpoint>, ElevateError> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(match self.behavior {
                Behavior::NoEndpoint => None,
                behavior => Some(FakeEndpoint { behavior }),
            })
        }

        fn unbind(&self, _endpoint: FakeEndpoint) -> Result<(), ElevateError> {
            self.unbinds.fetch_add(1, Ordering::SeqCst);
            Err(ElevateError::NoReply)
        }

        fn availability(&self) -> watch::Receiver<bool> {
            self.availability.subscribe()
        }

        fn authorization_outcomes(&self) -> broadcast::Receiver<AuthorizationOutcome> {
            self.outcomes.subscribe()
        }
    }

    fn channel(host: FakeHost) -> ElevationChannel<FakeHost> {
        ElevationChannel::new(Arc::new(host), &ElevationConfig::default())
    }

    #[test]
    fn instruction_text() {
        insta::assert_snapshot!(
            manual_instruction("dev.duskswitch"),
            @"pm grant dev.duskswitch android.permission.WRITE_SECURE_SETTINGS"
        );
        insta::assert_snapshot!(
            host_instruction("dev.duskswitch"),
            @"adb shell pm grant dev.duskswitch android.permission.WRITE_SECURE_SETTINGS"
        );
    }

    #[tokio::test]
    async fn exit_zero_is_success() {
        let ch = channel(FakeHost::new(Behavior::Reply(0)));
        assert_eq!(ch.via_elevation_service("dev.test").await, GrantResult::Success);
        assert_eq!(ch.host().unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_command_failed() {
        let ch = channel(FakeHost::new(Behavior::Reply(17)));
        assert_eq!(
            ch.via_elevation_service("dev.test").await,
            GrantResult::CommandFailed { exit_code: 17 }
        );
    }

    #[tokio::test]
    async fn missing_endpoint_is_service_unavailable() {
        let ch = channel(FakeHost::new(Behavior::NoEndpoint));
        assert_eq!(
            ch.via_elevation_service("dev.test").await,
            GrantResult::ServiceUnavailable
        );
        assert_eq!(ch.host().unbinds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn not_ready_skips_bind() {
        let host = FakeHost::new(Behavior::Reply(0));
        host.availability.send_replace(false);
        let ch = channel(host);
        assert_eq!(
            ch.via_elevation_service("dev.test").await,
            GrantResult::ServiceUnavailable
        );
        assert_eq!(ch.host().binds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn authorization_check_error_is_not_authorized() {
        let mut host = FakeHost::new(Behavior::Reply(0));
        host.authorized = Err(());
        let ch = channel(host);
        assert_eq!(
            ch.via_elevation_service("dev.test").await,
            GrantResult::NotAuthorized
        );
        assert_eq!(ch.host().binds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unauthorized_requests_authorization_without_binding() {
        let mut host = FakeHost::new(Behavior::Reply(0));
        host.authorized = Ok(false);
        let ch = channel(host);
        assert_eq!(
            ch.via_elevation_service("dev.test").await,
            GrantResult::NotAuthorized
        );
        assert_eq!(ch.host().authorization_requests.load(Ordering::SeqCst), 1);
        assert_eq!(ch.host().binds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn security_rejection_is_not_authorized() {
        let ch = channel(FakeHost::new(Behavior::Reject));
        assert_eq!(
            ch.via_elevation_service("dev.test").await,
            GrantResult::NotAuthorized
        );
        assert_eq!(ch.host().unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_and_releases_the_bind() {
        let ch = channel(FakeHost::new(Behavior::Hang));
        let result = ch.via_elevation_service("dev.test").await;
        match result {
            GrantResult::Unexpected { error } => assert!(error.starts_with("timeout")),
            other => panic!("expected Unexpected, got {other:?}"),
        }
        assert_eq!(ch.host().unbinds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn readiness_follows_availability() {
        let host = FakeHost::new(Behavior::Reply(0));
        let ch = channel(host);
        assert!(ch.readiness().is_ready());

        ch.host().availability.send_replace(false);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!ch.readiness().is_ready());

        ch.readiness().detach();
        ch.host().availability.send_replace(true);
        tokio::task::yield_now().await;
        assert!(!ch.readiness().is_ready());
    }

    #[test]
    fn reply_mapping() {
        assert_eq!(map_reply(Reply::UnknownTransaction), GrantResult::ServiceUnavailable);
        assert_eq!(
            map_reply(Reply::SecurityRejected("uid".into())),
            GrantResult::NotAuthorized
        );
        assert!(matches!(
            map_reply(Reply::BadInterfaceToken("x".into())),
            GrantResult::Unexpected { .. }
        ));
    }

    #[tokio::test]
    async fn superuser_spawn_failure_is_unexpected() {
        let config = ElevationConfig {
            superuser_binary: "/nonexistent/su".into(),
            ..ElevationConfig::default()
        };
        let ch = ElevationChannel::new(Arc::new(FakeHost::new(Behavior::Reply(0))), &config);
        match ch.via_superuser("dev.test").await {
            GrantResult::Unexpected { error } => assert!(error.starts_with("spawn")),
            other => panic!("expected Unexpected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn superuser_exit_code_is_mapped() {
        // `sh` reads the grant command from stdin; `pm` is absent here, so
        // the shell exits non-zero.
        let config = ElevationConfig {
            superuser_binary: "sh".into(),
            ..ElevationConfig::default()
        };
        let ch = ElevationChannel::new(Arc::new(FakeHost::new(Behavior::Reply(0))), &config);
        assert!(matches!(
            ch.via_superuser("dev.test").await,
            GrantResult::CommandFailed { .. }
        ));
    }

    #[tokio::test]
    async fn denying_superuser_is_command_failed() {
        // `false` exits without reading stdin, like a `su` that refuses.
        let config = ElevationConfig {
            superuser_binary: "false".into(),
            ..ElevationConfig::default()
        };
        let ch = ElevationChannel::new(Arc::new(FakeHost::new(Behavior::Reply(0))), &config);
        assert_eq!(
            ch.via_superuser("dev.test").await,
            GrantResult::CommandFailed { exit_code: 1 }
        );
    }
}
