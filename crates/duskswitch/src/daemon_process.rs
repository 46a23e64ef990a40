// ── Theme daemon process ──
//
// The theme service runs as a separate `duskswitch daemon` process so it
// outlives the command that started it. The daemon holds an exclusive lock
// on its pid file for as long as it runs; a pid file nobody has locked is
// left over from a crash, whatever process the pid now names. Everything
// else talks to the daemon with signals: HUP reloads preferences, USR2 is
// the stop action, TERM stops it.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use duskswitch_core::{CoreError, MonitoringService};
use tracing::{debug, info, warn};

/// Handle on the background `duskswitch daemon` process.
#[derive(Debug, Clone)]
pub struct DaemonProcess {
    pid_path: PathBuf,
    config_file: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

impl DaemonProcess {
    pub fn new(pid_path: impl Into<PathBuf>) -> Self {
        Self {
            pid_path: pid_path.into(),
            config_file: None,
            log_dir: None,
        }
    }

    /// Config file handed to the spawned daemon.
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Pid of a live daemon, if any. A stale pid file reads as `None`.
    pub fn running_pid(&self) -> Option<u32> {
        let pid = read_pid(&self.pid_path)?;
        let file = File::open(&self.pid_path).ok()?;
        match Flock::lock(file, FlockArg::LockSharedNonblock) {
            Ok(_unheld) => {
                debug!(pid, path = %self.pid_path.display(), "pid file not locked, stale");
                return None;
            }
            Err((_, Errno::EWOULDBLOCK)) => {}
            Err((_, e)) => debug!(error = %e, "pid file lock check failed"),
        }
        process_alive(pid).then_some(pid)
    }

    /// Claim the pid file for this process. `None` when another daemon
    /// holds it. The claim lasts until the guard drops.
    pub fn claim(&self) -> std::io::Result<Option<PidFileGuard>> {
        if let Some(parent) = self.pid_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.pid_path)?;
        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => return Ok(None),
            Err((_, e)) => return Err(e.into()),
        };

        lock.set_len(0)?;
        writeln!(lock, "{}", std::process::id())?;
        lock.sync_all()?;
        Ok(Some(PidFileGuard {
            path: self.pid_path.clone(),
            _lock: lock,
        }))
    }

    /// Send `signal` to the running daemon. Returns whether a daemon was
    /// there to receive it.
    pub fn signal(&self, signal: Signal) -> Result<bool, CoreError> {
        let Some(pid) = self.running_pid() else {
            debug!(%signal, "no daemon running");
            return Ok(false);
        };
        kill(to_pid(pid)?, signal).map_err(|e| CoreError::MonitoringStart {
            message: format!("{signal} to pid {pid}: {e}"),
        })?;
        debug!(%signal, pid, "signalled daemon");
        Ok(true)
    }

    /// Ask a running daemon to pick up changed preferences.
    pub fn reload(&self) -> bool {
        self.signal(Signal::SIGHUP).unwrap_or_else(|e| {
            warn!(error = %e, "could not notify daemon (non-fatal)");
            false
        })
    }
}

impl MonitoringService for DaemonProcess {
    fn start(&self) -> Result<(), CoreError> {
        if let Some(pid) = self.running_pid() {
            debug!(pid, "daemon already running");
            return Ok(());
        }

        let exe = std::env::current_exe()?;
        let mut command = Command::new(exe);
        if let Some(config) = &self.config_file {
            command.arg("--config").arg(config);
        }
        command.arg("daemon");
        if let Some(dir) = &self.log_dir {
            command.arg("--log-dir").arg(dir);
        }
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CoreError::MonitoringStart {
                message: e.to_string(),
            })?;
        info!(pid = child.id(), "theme daemon started");
        Ok(())
    }

    fn stop(&self) {
        match self.signal(Signal::SIGTERM) {
            Ok(true) => info!("theme daemon stopped"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "could not stop theme daemon"),
        }
    }
}

/// The daemon's hold on its pid file. Dropping it removes the file, if it
/// still names this process, and releases the lock.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    _lock: Flock<File>,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if read_pid(&self.path) != Some(std::process::id()) {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to remove pid file"),
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn to_pid(pid: u32) -> Result<Pid, CoreError> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| CoreError::MonitoringStart {
            message: format!("pid {pid} out of range"),
        })
}

/// Signal 0 checks for existence. EPERM still means the process exists.
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = to_pid(pid) else {
        return false;
    };
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

/// Stand-in used when setup should not launch the daemon.
pub struct NoDaemon;

impl MonitoringService for NoDaemon {
    fn start(&self) -> Result<(), CoreError> {
        debug!("daemon launch skipped");
        Ok(())
    }

    fn stop(&self) {}
}
