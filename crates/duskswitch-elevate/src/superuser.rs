//! Superuser shell strategy.
//!
//! Spawns the superuser binary, feeds the command and `exit` on stdin and
//! waits for the shell to finish.

use std::io::ErrorKind;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::{debug, warn};

use crate::error::Error;

/// Default superuser binary name, resolved through `PATH`.
pub const DEFAULT_SUPERUSER_BINARY: &str = "su";

#[derive(Debug, Clone)]
pub struct SuperuserShell {
    binary: String,
}

impl Default for SuperuserShell {
    fn default() -> Self {
        Self::new(DEFAULT_SUPERUSER_BINARY)
    }
}

impl SuperuserShell {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run `command` in the superuser shell and return the shell's exit
    /// code. Only a failure to start the shell is an error.
    pub async fn run(&self, command: &str) -> Result<i32, Error> {
        let mut child = Command::new(&self.binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            match feed(&mut stdin, command).await {
                Ok(()) => {}
                // A denying shell exits before reading; its status says why.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(binary = %self.binary, "superuser shell closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let output = child.wait_with_output().await?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("su-out: {line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("su-err: {line}");
        }

        // Killed by a signal: no exit code to report.
        Ok(output.status.code().unwrap_or(-1))
    }
}

async fn feed(stdin: &mut ChildStdin, command: &str) -> std::io::Result<()> {
    stdin.write_all(command.as_bytes()).await?;
    stdin.write_all(b"\nexit\n").await?;
    stdin.flush().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // `sh` reads commands from stdin exactly like `su` does.

    #[tokio::test]
    async fn zero_exit_is_reported() {
        let shell = SuperuserShell::new("sh");
        assert_eq!(shell.run("true").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn command_exit_code_wins_over_trailing_exit() {
        let shell = SuperuserShell::new("sh");
        assert_eq!(shell.run("exit 4").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let shell = SuperuserShell::new("/nonexistent/su");
        let err = shell.run("true").await.unwrap_err();
        assert_eq!(err.kind_name(), "spawn");
    }

    #[tokio::test]
    async fn shell_exiting_before_reading_reports_its_status() {
        // More than a pipe buffer, so the write hits the closed pipe.
        let shell = SuperuserShell::new("false");
        assert_eq!(shell.run(&"x".repeat(1 << 20)).await.unwrap(), 1);
    }
}
