//! Client side of the companion elevation service.
//!
//! [`ElevationHost`] abstracts the thing that hands out bindings to the
//! privileged helper: it reports whether the helper is reachable, whether the
//! caller is authorized to use it, and binds short-lived [`ServiceEndpoint`]s.
//! [`SocketHost`] is the Unix-socket implementation; tests substitute their
//! own hosts.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::protocol::{ClientCodec, INTERFACE_DESCRIPTOR, Reply, Request};

const OUTCOME_CHANNEL_CAPACITY: usize = 16;

// ── Traits ───────────────────────────────────────────────────────────

/// Result of an asynchronous authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Granted,
    Denied,
}

/// A bound instance of the companion service.
pub trait ServiceEndpoint: Send + 'static {
    /// Send one request and wait for its reply.
    fn transact(&mut self, request: Request) -> impl Future<Output = Result<Reply, Error>> + Send;
}

/// Hands out bindings to the companion service.
pub trait ElevationHost: Send + Sync + 'static {
    type Endpoint: ServiceEndpoint;

    /// Whether this caller may use the service. Errors mean the check
    /// itself could not be performed.
    fn check_authorized(&self) -> Result<bool, Error>;

    /// Ask for authorization without waiting. The answer arrives on
    /// [`authorization_outcomes`](Self::authorization_outcomes).
    fn request_authorization(&self);

    /// Bind a fresh instance. `Ok(None)` means the host answered but offered
    /// no usable endpoint.
    fn bind(&self) -> impl Future<Output = Result<Option<Self::Endpoint>, Error>> + Send;

    /// Release a binding obtained from [`bind`](Self::bind).
    fn unbind(&self, endpoint: Self::Endpoint) -> Result<(), Error>;

    /// Availability transitions of the service ("received" / "dead").
    fn availability(&self) -> watch::Receiver<bool>;

    fn authorization_outcomes(&self) -> broadcast::Receiver<AuthorizationOutcome>;
}

// ── SocketHost ───────────────────────────────────────────────────────

/// Settings for [`SocketHost`].
#[derive(Debug, Clone)]
pub struct SocketHostConfig {
    /// Socket the companion service listens on. Its path is the component
    /// identity.
    pub socket_path: PathBuf,
    /// File whose presence means the companion operator authorized us.
    pub marker_path: PathBuf,
    /// How often the availability watcher pings the service.
    pub probe_interval: Duration,
    /// How long an authorization request waits for the marker.
    pub authorization_wait: Duration,
}

impl SocketHostConfig {
    pub fn new(socket_path: impl Into<PathBuf>, marker_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            marker_path: marker_path.into(),
            probe_interval: Duration::from_secs(2),
            authorization_wait: Duration::from_secs(60),
        }
    }
}

/// [`ElevationHost`] backed by a Unix domain socket and an authorization
/// marker file.
pub struct SocketHost {
    config: SocketHostConfig,
    availability_tx: watch::Sender<bool>,
    outcome_tx: broadcast::Sender<AuthorizationOutcome>,
    authorization_pending: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SocketHost {
    pub fn new(config: SocketHostConfig) -> Self {
        let (availability_tx, _) = watch::channel(false);
        let (outcome_tx, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);
        Self {
            config,
            availability_tx,
            outcome_tx,
            authorization_pending: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SocketHostConfig {
        &self.config
    }

    /// Spawn the availability watcher. Pings the service on every interval
    /// and publishes transitions only.
    pub fn watch_availability(&self) {
        let tx = self.availability_tx.clone();
        let path = self.config.socket_path.clone();
        let period = self.config.probe_interval;
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        publish_availability(&tx, probe(&path).await);
                    }
                }
            }
            debug!("availability watcher stopped");
        });
    }

    /// Ping once and publish the result right away, without waiting for
    /// the watcher's next interval.
    pub async fn probe_now(&self) -> bool {
        let alive = probe(&self.config.socket_path).await;
        publish_availability(&self.availability_tx, alive);
        alive
    }

    /// Stop background tasks spawned by this host.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn probe(path: &Path) -> bool {
    ping(path).await.unwrap_or_else(|e| {
        debug!(error = %e, "companion ping failed");
        false
    })
}

/// Publish transitions only.
fn publish_availability(tx: &watch::Sender<bool>, alive: bool) {
    tx.send_if_modified(|current| {
        if *current == alive {
            return false;
        }
        if alive {
            info!("companion service received");
        } else {
            info!("companion service dead");
        }
        *current = alive;
        true
    });
}

impl Drop for SocketHost {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ElevationHost for SocketHost {
    type Endpoint = SocketEndpoint;

    fn check_authorized(&self) -> Result<bool, Error> {
        marker_present(&self.config.marker_path)
    }

    fn request_authorization(&self) {
        if self.authorization_pending.swap(true, Ordering::AcqRel) {
            debug!("authorization request already pending");
            return;
        }

        let marker = self.config.marker_path.clone();
        let wait = self.config.authorization_wait;
        let tx = self.outcome_tx.clone();
        let pending = Arc::clone(&self.authorization_pending);
        let cancel = self.cancel.child_token();

        info!(marker = %marker.display(), "waiting for companion authorization");
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                granted = wait_for_marker(&marker, wait) => Some(granted),
            };
            pending.store(false, Ordering::Release);

            let Some(granted) = outcome else { return };
            let outcome = if granted {
                AuthorizationOutcome::Granted
            } else {
                AuthorizationOutcome::Denied
            };
            debug!(?outcome, "authorization request finished");
            let _ = tx.send(outcome);
        });
    }

    async fn bind(&self) -> Result<Option<SocketEndpoint>, Error> {
        match UnixStream::connect(&self.config.socket_path).await {
            Ok(stream) => Ok(Some(SocketEndpoint {
                framed: Framed::new(stream, ClientCodec),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.config.socket_path.display(), "no companion socket");
                Ok(None)
            }
            Err(e) => Err(Error::Unreachable {
                path: self.config.socket_path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn unbind(&self, endpoint: SocketEndpoint) -> Result<(), Error> {
        let stream = endpoint.framed.into_inner().into_std()?;
        match stream.shutdown(std::net::Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn availability(&self) -> watch::Receiver<bool> {
        self.availability_tx.subscribe()
    }

    fn authorization_outcomes(&self) -> broadcast::Receiver<AuthorizationOutcome> {
        self.outcome_tx.subscribe()
    }
}

// ── SocketEndpoint ───────────────────────────────────────────────────

/// One connection to the companion service.
pub struct SocketEndpoint {
    framed: Framed<UnixStream, ClientCodec>,
}

impl ServiceEndpoint for SocketEndpoint {
    async fn transact(&mut self, request: Request) -> Result<Reply, Error> {
        debug!(code = request.code, "sending companion request");
        self.framed.send(request).await?;
        match self.framed.next().await {
            Some(reply) => reply,
            None => Err(Error::NoReply),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

/// Check the service answers the interface query with our descriptor.
pub async fn ping(socket_path: &Path) -> Result<bool, Error> {
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let mut endpoint = SocketEndpoint {
        framed: Framed::new(stream, ClientCodec),
    };
    match endpoint.transact(Request::interface_query()).await? {
        Reply::Descriptor(desc) => Ok(desc == INTERFACE_DESCRIPTOR),
        other => {
            warn!(?other, "unexpected answer to interface query");
            Ok(false)
        }
    }
}

/// Authorized means the marker exists and is a readable file.
pub fn marker_present(path: &Path) -> Result<bool, Error> {
    match std::fs::File::open(path) {
        Ok(file) => Ok(file.metadata()?.is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::Authorization(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

/// Create the marker file. Run by the companion operator.
pub fn write_marker(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, b"authorized\n")?;
    Ok(())
}

/// Remove the marker file. Missing is fine.
pub fn remove_marker(path: &Path) -> Result<(), Error> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

async fn wait_for_marker(path: &Path, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    let mut interval = tokio::time::interval(Duration::from_millis(250));
    loop {
        interval.tick().await;
        if matches!(marker_present(path), Ok(true)) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::service::CompanionService;

    fn host_in(dir: &Path) -> SocketHost {
        let mut config =
            SocketHostConfig::new(dir.join("companion.sock"), dir.join("authorized"));
        config.probe_interval = Duration::from_millis(20);
        config.authorization_wait = Duration::from_millis(300);
        SocketHost::new(config)
    }

    #[test]
    fn marker_controls_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        assert!(!host.check_authorized().unwrap());

        write_marker(&host.config().marker_path).unwrap();
        assert!(host.check_authorized().unwrap());

        remove_marker(&host.config().marker_path).unwrap();
        remove_marker(&host.config().marker_path).unwrap();
        assert!(!host.check_authorized().unwrap());
    }

    #[tokio::test]
    async fn bind_without_socket_yields_no_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        assert!(host.bind().await.unwrap().is_none());
        assert!(!ping(&host.config().socket_path).await.unwrap());
    }

    #[tokio::test]
    async fn authorization_request_reports_granted() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let mut outcomes = host.authorization_outcomes();

        host.request_authorization();
        write_marker(&host.config().marker_path).unwrap();

        assert_eq!(outcomes.recv().await.unwrap(), AuthorizationOutcome::Granted);
    }

    #[tokio::test]
    async fn authorization_request_times_out_as_denied() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let mut outcomes = host.authorization_outcomes();

        host.request_authorization();
        // A second request while one is pending is coalesced.
        host.request_authorization();

        assert_eq!(outcomes.recv().await.unwrap(), AuthorizationOutcome::Denied);
        assert!(outcomes.try_recv().is_err());
    }

    #[tokio::test]
    async fn probe_now_publishes_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        assert!(!host.probe_now().await);

        let cancel = CancellationToken::new();
        let service = CompanionService::new(&host.config().socket_path);
        let server = tokio::spawn({
            let cancel = cancel.clone();
            async move { service.serve(cancel).await }
        });
        while !host.probe_now().await {
            tokio::task::yield_now().await;
        }
        assert!(*host.availability().borrow());

        cancel.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn availability_follows_the_service() {
        let dir = tempfile::tempdir().unwrap();
        let host = host_in(dir.path());
        let mut available = host.availability();
        host.watch_availability();

        let cancel = CancellationToken::new();
        let service = CompanionService::new(&host.config().socket_path);
        let server = tokio::spawn({
            let cancel = cancel.clone();
            async move { service.serve(cancel).await }
        });

        available.wait_for(|up| *up).await.unwrap();

        let mut endpoint = host.bind().await.unwrap().unwrap();
        let reply = endpoint.transact(Request::execute("exit 0")).await.unwrap();
        assert_eq!(reply, Reply::ExitCode(0));
        host.unbind(endpoint).unwrap();

        cancel.cancel();
        server.await.unwrap().unwrap();
        available.wait_for(|up| !*up).await.unwrap();
        host.shutdown();
    }
}
