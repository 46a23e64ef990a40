// ── Bounded shell commands ──

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::ProbeError;

/// Run `base` followed by `args` and return trimmed stdout.
///
/// `base` is the program plus any fixed leading arguments, so a probe can be
/// pointed at a wrapper (`adb shell settings`) without code changes. The
/// child is killed if `timeout` elapses first.
pub async fn run_command(
    base: &[String],
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let rendered = render(base, args);
    let Some((program, prefix)) = base.split_first() else {
        return Err(ProbeError::Command {
            command: rendered,
            reason: "empty command".into(),
        });
    };

    let mut command = Command::new(program);
    command
        .args(prefix)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(ProbeError::Command {
                command: rendered,
                reason: e.to_string(),
            });
        }
        Err(_) => return Err(ProbeError::Timeout { command: rendered }),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::Command {
            command: rendered,
            reason: format!("{}: {}", output.status, stderr.trim()),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    debug!(command = %rendered, bytes = stdout.len(), "command finished");
    Ok(stdout)
}

fn render(base: &[String], args: &[&str]) -> String {
    base.iter()
        .map(String::as_str)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
